//! Wire model of the registry build API

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully qualified registry the build runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryIdentity {
    pub subscription_id: String,
    pub resource_group: String,
    pub registry_name: String,
}

impl RegistryIdentity {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        registry_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            registry_name: registry_name.into(),
        }
    }

    /// ARM resource path of the registry
    pub fn resource_path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerRegistry/registries/{}",
            self.subscription_id, self.resource_group, self.registry_name
        )
    }
}

/// One-time upload location for build source
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDestination {
    /// Blob URL with an embedded SAS token
    pub upload_url: String,

    /// Server-relative path, passed back as the build's source location
    pub relative_path: String,
}

impl fmt::Debug for UploadDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadDestination")
            .field("upload_url", &redact_url(&self.upload_url))
            .field("relative_path", &self.relative_path)
            .finish()
    }
}

/// Read-only location of a build's log blob
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLocation {
    pub log_link: String,
}

impl fmt::Debug for LogLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogLocation")
            .field("log_link", &redact_url(&self.log_link))
            .finish()
    }
}

/// Identifier of a queued build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildHandle {
    build_id: String,
}

impl BuildHandle {
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
        }
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }
}

impl fmt::Display for BuildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build_id)
    }
}

/// Remote build status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Queued,
    Started,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Error,
    Timeout,
    #[serde(other)]
    Unknown,
}

impl BuildStatus {
    /// No further transition happens from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded
                | BuildStatus::Failed
                | BuildStatus::Canceled
                | BuildStatus::Error
                | BuildStatus::Timeout
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Succeeded)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Queued => "Queued",
            BuildStatus::Started => "Started",
            BuildStatus::Running => "Running",
            BuildStatus::Succeeded => "Succeeded",
            BuildStatus::Failed => "Failed",
            BuildStatus::Canceled => "Canceled",
            BuildStatus::Error => "Error",
            BuildStatus::Timeout => "Timeout",
            BuildStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Operating system the build runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    /// Platform of the local host.
    ///
    /// Every OS outside the Windows family maps to `Linux`. This mirrors the
    /// host, it does not detect what the Dockerfile targets.
    pub fn host() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn from_os_name(os: &str) -> Self {
        let os = os.to_ascii_lowercase();
        if os == "windows" || os.starts_with("windows_") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("Linux"),
            Platform::Windows => f.write_str("Windows"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlatformProperties {
    os_type: Platform,
}

const MIN_TIMEOUT_SECS: u32 = 300;
const MAX_TIMEOUT_SECS: u32 = 28_800;

/// Quick build request body
///
/// Only constructible through [`BuildRequest::new`], which rejects
/// Dockerfile paths that leave the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(rename = "type")]
    request_type: &'static str,
    image_names: Vec<String>,
    is_push_enabled: bool,
    source_location: String,
    platform: PlatformProperties,
    docker_file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u32>,
}

impl BuildRequest {
    pub fn new(
        image_names: Vec<String>,
        source_location: impl Into<String>,
        docker_file_path: impl Into<String>,
        platform: Platform,
    ) -> Result<Self> {
        let source_location = source_location.into();
        let docker_file_path = docker_file_path.into();

        if image_names.is_empty() {
            return Err(CloudError::InvalidRequest(
                "at least one image name is required".to_string(),
            ));
        }
        if let Some(name) = image_names.iter().find(|n| n.trim().is_empty()) {
            return Err(CloudError::InvalidRequest(format!(
                "image name must not be blank: {:?}",
                name
            )));
        }
        if source_location.is_empty() {
            return Err(CloudError::InvalidRequest(
                "source location must not be empty".to_string(),
            ));
        }
        validate_relative_path(&docker_file_path)?;

        Ok(Self {
            request_type: "QuickBuild",
            image_names,
            is_push_enabled: true,
            source_location,
            platform: PlatformProperties { os_type: platform },
            docker_file_path,
            timeout: None,
        })
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.is_push_enabled = push;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Result<Self> {
        Self::validate_timeout(seconds)?;
        self.timeout = Some(seconds);
        Ok(self)
    }

    /// Build timeouts accepted by the service
    pub fn validate_timeout(seconds: u32) -> Result<()> {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&seconds) {
            return Err(CloudError::InvalidRequest(format!(
                "timeout must be between {} and {} seconds, got {}",
                MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, seconds
            )));
        }
        Ok(())
    }

    pub fn image_names(&self) -> &[String] {
        &self.image_names
    }

    pub fn is_push_enabled(&self) -> bool {
        self.is_push_enabled
    }

    pub fn source_location(&self) -> &str {
        &self.source_location
    }

    pub fn platform(&self) -> Platform {
        self.platform.os_type
    }

    pub fn docker_file_path(&self) -> &str {
        &self.docker_file_path
    }

    pub fn timeout(&self) -> Option<u32> {
        self.timeout
    }
}

/// `./`-prefixed POSIX path that never climbs out of its root
fn validate_relative_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(CloudError::InvalidRequest(format!(
            "Dockerfile path {:?} {}",
            path, reason
        )))
    };

    let Some(rest) = path.strip_prefix("./") else {
        return invalid("must be relative to the source root (./...)");
    };
    if rest.is_empty() || rest.contains('\\') {
        return invalid("is not a POSIX file path");
    }
    if rest.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return invalid("must be a normalized descendant of the source root");
    }
    Ok(())
}

/// Strip the query string (SAS token) from a URL for display
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?<redacted>", base),
        None => url.to_string(),
    }
}

// ============ API Types ============

#[derive(Debug, Deserialize)]
pub(crate) struct BuildResource {
    #[serde(default)]
    pub properties: Option<BuildProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BuildProperties {
    #[serde(default)]
    pub build_id: Option<String>,
    #[serde(default)]
    pub status: Option<BuildStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArmErrorResponse {
    pub error: ArmErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArmErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
