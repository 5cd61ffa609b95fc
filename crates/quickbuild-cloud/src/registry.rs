//! Container registry build API client
//!
//! Talks to the registry resource provider of the management endpoint with a
//! bearer token. Token acquisition is left to the caller.

use crate::error::{CloudError, Result};
use crate::model::{
    ArmErrorResponse, BuildHandle, BuildRequest, BuildResource, BuildStatus, LogLocation,
    RegistryIdentity, UploadDestination,
};
use crate::provider::BuildService;
use crate::retry::{RetryConfig, with_retry};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_API_VERSION: &str = "2018-02-01-preview";

/// Configuration for the registry build client
#[derive(Clone)]
pub struct RegistryClientConfig {
    pub endpoint: String,
    pub api_version: String,
    pub access_token: String,
    pub retry: RetryConfig,
}

impl RegistryClientConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            access_token: access_token.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl fmt::Debug for RegistryClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClientConfig")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("access_token", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

/// Registry build API client
pub struct RegistryBuildClient {
    client: reqwest::Client,
    config: RegistryClientConfig,
}

impl RegistryBuildClient {
    pub fn new(config: RegistryClientConfig) -> Result<Self> {
        if config.access_token.trim().is_empty() {
            return Err(CloudError::InvalidConfig(
                "an access token is required for the registry build API".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    fn registry_url(&self, registry: &RegistryIdentity, operation: &str) -> String {
        format!(
            "{}{}/{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            registry.resource_path(),
            operation,
            self.config.api_version
        )
    }

    /// `builds/{id}[/action]` for a build id made of ASCII letters, digits and `-`
    fn build_url(
        &self,
        registry: &RegistryIdentity,
        build: &BuildHandle,
        action: Option<&str>,
    ) -> Result<String> {
        let id = build.build_id();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(CloudError::InvalidRequest(format!("invalid build id: {:?}", id)));
        }
        let operation = match action {
            Some(action) => format!("builds/{}/{}", id, action),
            None => format!("builds/{}", id),
        };
        Ok(self.registry_url(registry, &operation))
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, body: Option<&BuildRequest>) -> Result<T> {
        tracing::debug!("POST {}", url);
        let mut request = self.client.post(url).bearer_auth(&self.config.access_token);
        request = match body {
            Some(body) => request.json(body),
            // The action endpoints expect an explicit empty body
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };
        parse_response(request.send().await?).await
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        parse_response(response).await
    }
}

#[async_trait]
impl BuildService for RegistryBuildClient {
    async fn get_upload_target(&self, registry: &RegistryIdentity) -> Result<UploadDestination> {
        let url = self.registry_url(registry, "getBuildSourceUploadUrl");
        let destination: UploadDestination =
            with_retry(&self.config.retry, "getBuildSourceUploadUrl", CloudError::is_transient, || {
                self.post(&url, None)
            })
            .await?;

        if destination.upload_url.is_empty() || destination.relative_path.is_empty() {
            return Err(CloudError::InvalidResponse(
                "upload target is missing uploadUrl or relativePath".to_string(),
            ));
        }
        Ok(destination)
    }

    async fn submit_build(
        &self,
        registry: &RegistryIdentity,
        request: &BuildRequest,
    ) -> Result<BuildHandle> {
        let url = self.registry_url(registry, "queueBuild");
        // Queueing is not idempotent: only retry requests that never left
        let build: BuildResource =
            with_retry(&self.config.retry, "queueBuild", CloudError::is_connect, || {
                self.post(&url, Some(request))
            })
            .await?;

        let build_id = build
            .properties
            .and_then(|p| p.build_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CloudError::InvalidResponse("queued build has no buildId".to_string())
            })?;

        tracing::info!("Queued build {} in {}", build_id, registry.registry_name);
        Ok(BuildHandle::new(build_id))
    }

    async fn get_log_location(
        &self,
        registry: &RegistryIdentity,
        build: &BuildHandle,
    ) -> Result<LogLocation> {
        let url = self.build_url(registry, build, Some("getLogLink"))?;
        let location: LogLocation =
            with_retry(&self.config.retry, "getLogLink", CloudError::is_transient, || {
                self.post(&url, None)
            })
            .await?;

        if location.log_link.is_empty() {
            return Err(CloudError::InvalidResponse(format!(
                "build {} has no log link",
                build
            )));
        }
        Ok(location)
    }

    async fn get_build_status(
        &self,
        registry: &RegistryIdentity,
        build: &BuildHandle,
    ) -> Result<BuildStatus> {
        let url = self.build_url(registry, build, None)?;
        let resource: BuildResource =
            with_retry(&self.config.retry, "getBuild", CloudError::is_transient, || {
                self.get(&url)
            })
            .await?;

        Ok(resource
            .properties
            .and_then(|p| p.status)
            .unwrap_or(BuildStatus::Unknown))
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        let body = response.bytes().await?;
        return Ok(serde_json::from_slice(&body)?);
    }

    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ArmErrorResponse>(&body) {
        Ok(err) if !err.error.code.is_empty() => {
            format!("{}: {}", err.error.code, err.error.message)
        }
        Ok(err) => err.error.message,
        Err(_) if body.is_empty() => format!("HTTP {}", code),
        Err(_) => body,
    };

    Err(match code {
        401 | 403 => CloudError::AuthenticationFailed(message),
        404 => CloudError::ResourceNotFound(message),
        _ => CloudError::ApiError {
            status: code,
            message,
        },
    })
}
