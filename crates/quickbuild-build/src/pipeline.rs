//! クイックビルドのパイプライン
//!
//! アーカイブ作成 → アップロード先の取得 → アップロード → ビルド投入 →
//! ログ転送 を順に実行します。各ステージの失敗は残りのステージを中止し、
//! ステータス出力先に書き込んだうえで呼び出し元に返します。
//! ログ転送はビルド投入後のベストエフォートなので、失敗してもビルドは
//! 投入済みとして扱います。

use crate::context::ContextBuilder;
use crate::error::{BuildError, BuildResult};
use crate::image::normalize_image_names;
use crate::logs::{LogOptions, LogOutcome, LogStreamer};
use crate::resolver::{relative_dockerfile_path, resolve_dockerfile};
use crate::status::StatusSink;
use crate::submitter::{BuildSubmitter, RequestSpec};
use crate::upload::{BlobUploader, UploadTargetResolver};
use quickbuild_cloud::{
    BlobStore, BuildHandle, BuildRequest, BuildService, Platform, RegistryIdentity,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// ビルドの入力
#[derive(Debug, Clone)]
pub struct BuildParameters {
    pub registry: RegistryIdentity,
    pub source_directory: PathBuf,
    /// 未指定なら `{source}/Dockerfile`
    pub dockerfile_path: Option<PathBuf>,
    pub image_names: Vec<String>,
    pub push: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub keep_archive: bool,
    pub timeout_secs: Option<u32>,
    pub logs: LogOptions,
}

/// 投入済みのビルドとログ転送の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBuild {
    pub handle: BuildHandle,
    pub logs: LogOutcome,
}

pub struct BuildPipeline {
    service: Arc<dyn BuildService>,
    blobs: Arc<dyn BlobStore>,
    sink: Arc<dyn StatusSink>,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl BuildPipeline {
    pub fn new(
        service: Arc<dyn BuildService>,
        blobs: Arc<dyn BlobStore>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            service,
            blobs,
            sink,
            options: PipelineOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// ビルドを投入してログを転送する
    pub async fn run(&self, params: &BuildParameters) -> BuildResult<QueuedBuild> {
        let handle = self.queue(params).await?;

        let logs = LogStreamer::new(
            self.service.clone(),
            self.blobs.clone(),
            self.sink.clone(),
            self.options.logs.clone(),
        )
        .with_cancellation(self.cancel.clone())
        .stream(&params.registry, &handle)
        .await;

        Ok(QueuedBuild { handle, logs })
    }

    /// ビルドを投入する（ログは転送しない）
    pub async fn queue(&self, params: &BuildParameters) -> BuildResult<BuildHandle> {
        match self.queue_stages(params).await {
            Ok(handle) => Ok(handle),
            Err(BuildError::Canceled) => {
                tracing::info!("Build pipeline canceled");
                self.sink.append_line("Build canceled");
                self.sink.show();
                Err(BuildError::Canceled)
            }
            Err(e) => {
                tracing::error!("Build pipeline failed: {}", e);
                self.sink.append_error(&format!("Build failed: {}", e));
                self.sink.show();
                Err(e)
            }
        }
    }

    async fn queue_stages(&self, params: &BuildParameters) -> BuildResult<BuildHandle> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Canceled);
        }

        // ネットワークに触れる前に入力を検証する
        if !params.source_directory.is_dir() {
            return Err(BuildError::SourceNotFound(params.source_directory.clone()));
        }
        let dockerfile =
            resolve_dockerfile(&params.source_directory, params.dockerfile_path.as_deref())?;
        let docker_file_path = relative_dockerfile_path(&params.source_directory, &dockerfile)?;
        let image_names = normalize_image_names(&params.image_names)?;
        if let Some(secs) = self.options.timeout_secs {
            BuildRequest::validate_timeout(secs).map_err(BuildError::service)?;
        }

        self.sink.append_line(&format!(
            "Uploading source code from {}",
            params.source_directory.display()
        ));
        let source = params.source_directory.clone();
        let mut archive = self
            .cancellable(async move {
                match tokio::task::spawn_blocking(move || ContextBuilder::create_archive(&source))
                    .await
                {
                    Ok(result) => result,
                    Err(e) => Err(BuildError::Io(std::io::Error::other(e))),
                }
            })
            .await?;
        archive.set_keep(self.options.keep_archive);

        let destination = self
            .cancellable(
                UploadTargetResolver::new(self.service.clone(), self.sink.clone())
                    .resolve(&params.registry),
            )
            .await?;

        let source_location = self
            .cancellable(
                BlobUploader::new(self.blobs.clone(), self.sink.clone())
                    .upload(&destination, &archive),
            )
            .await?;
        drop(archive);

        let request = BuildSubmitter::prepare(RequestSpec {
            image_names,
            push: params.push,
            source_location,
            docker_file_path,
            platform: Platform::host(),
            timeout_secs: self.options.timeout_secs,
        })?;

        self.cancellable(
            BuildSubmitter::new(self.service.clone(), self.sink.clone())
                .submit(&params.registry, &request),
        )
        .await
    }

    async fn cancellable<T, F>(&self, future: F) -> BuildResult<T>
    where
        F: Future<Output = BuildResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BuildError::Canceled),
            result = future => result,
        }
    }
}
