use crate::error::{BuildError, BuildResult};
use crate::status::StatusSink;
use quickbuild_cloud::{BuildHandle, BuildRequest, BuildService, Platform, RegistryIdentity};
use std::sync::Arc;

/// ビルドリクエストの組み立てに使う値
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub image_names: Vec<String>,
    pub push: bool,
    pub source_location: String,
    pub docker_file_path: String,
    pub platform: Platform,
    pub timeout_secs: Option<u32>,
}

pub struct BuildSubmitter {
    service: Arc<dyn BuildService>,
    sink: Arc<dyn StatusSink>,
}

impl BuildSubmitter {
    pub fn new(service: Arc<dyn BuildService>, sink: Arc<dyn StatusSink>) -> Self {
        Self { service, sink }
    }

    /// ビルドリクエストを組み立てる（不正なリクエストは送信されない）
    pub fn prepare(spec: RequestSpec) -> BuildResult<BuildRequest> {
        let request = BuildRequest::new(
            spec.image_names,
            spec.source_location,
            spec.docker_file_path,
            spec.platform,
        )
        .map_err(BuildError::service)?
        .with_push(spec.push);

        match spec.timeout_secs {
            Some(secs) => request.with_timeout(secs).map_err(BuildError::service),
            None => Ok(request),
        }
    }

    /// ビルドをキューに投入
    pub async fn submit(
        &self,
        registry: &RegistryIdentity,
        request: &BuildRequest,
    ) -> BuildResult<BuildHandle> {
        tracing::info!(
            "Queueing build of {:?} on {} ({})",
            request.image_names(),
            registry.registry_name,
            request.platform()
        );
        self.sink.append_line("Queueing build");

        let handle = self
            .service
            .submit_build(registry, request)
            .await
            .map_err(BuildError::service)?;

        if handle.build_id().is_empty() {
            return Err(BuildError::Service(
                quickbuild_cloud::CloudError::InvalidResponse(
                    "build service returned an empty build id".to_string(),
                ),
            ));
        }

        self.sink
            .append_line(&format!("Build {} queued", handle.build_id()));
        Ok(handle)
    }
}
