//! Build service trait definition

use crate::error::Result;
use crate::model::{
    BuildHandle, BuildRequest, BuildStatus, LogLocation, RegistryIdentity, UploadDestination,
};
use async_trait::async_trait;

/// Build orchestration service abstraction
///
/// The REST client ([`crate::RegistryBuildClient`]) implements this trait;
/// tests substitute in-memory fakes.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Request a one-time, credentialed upload location for build source
    async fn get_upload_target(&self, registry: &RegistryIdentity) -> Result<UploadDestination>;

    /// Queue a build and return its handle
    async fn submit_build(
        &self,
        registry: &RegistryIdentity,
        request: &BuildRequest,
    ) -> Result<BuildHandle>;

    /// Resolve the current log blob for a build
    async fn get_log_location(
        &self,
        registry: &RegistryIdentity,
        build: &BuildHandle,
    ) -> Result<LogLocation>;

    /// Current status of a build
    async fn get_build_status(
        &self,
        registry: &RegistryIdentity,
        build: &BuildHandle,
    ) -> Result<BuildStatus>;
}
