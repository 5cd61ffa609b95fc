//! ソースアーカイブのアップロード
//!
//! ビルドサービスから一度きりのアップロード先を取得し、
//! アーカイブを書き込んで完了を確認してから相対パスを返します。

use crate::context::SourceArchive;
use crate::error::{BuildError, BuildResult};
use crate::status::StatusSink;
use quickbuild_cloud::{
    BlobLocation, BlobStore, BuildService, CloudError, RegistryIdentity, UploadDestination,
};
use std::sync::Arc;

/// アップロード先を解決するハンドラ
pub struct UploadTargetResolver {
    service: Arc<dyn BuildService>,
    sink: Arc<dyn StatusSink>,
}

impl UploadTargetResolver {
    pub fn new(service: Arc<dyn BuildService>, sink: Arc<dyn StatusSink>) -> Self {
        Self { service, sink }
    }

    /// SAS トークン付きのアップロード先を取得
    pub async fn resolve(&self, registry: &RegistryIdentity) -> BuildResult<UploadDestination> {
        self.sink.append_line("   Getting build source upload URL");
        let destination = self
            .service
            .get_upload_target(registry)
            .await
            .map_err(BuildError::service)?;

        tracing::debug!("Upload target: {:?}", destination);
        Ok(destination)
    }
}

/// アーカイブをブロブに書き込むハンドラ
pub struct BlobUploader {
    blobs: Arc<dyn BlobStore>,
    sink: Arc<dyn StatusSink>,
}

impl BlobUploader {
    pub fn new(blobs: Arc<dyn BlobStore>, sink: Arc<dyn StatusSink>) -> Self {
        Self { blobs, sink }
    }

    /// アーカイブをアップロード
    ///
    /// # Returns
    /// 書き込み完了が確認できた後、ビルドリクエストに渡す相対パスを返す
    pub async fn upload(
        &self,
        destination: &UploadDestination,
        archive: &SourceArchive,
    ) -> BuildResult<String> {
        self.sink.append_line("   Getting blob info from upload URL");
        let location =
            BlobLocation::parse(&destination.upload_url).map_err(BuildError::transfer)?;

        self.sink.append_line(&format!(
            "   Uploading {} bytes to {}",
            archive.size(),
            location.display_url()
        ));
        let receipt = self
            .blobs
            .write_blob(&location, archive.path())
            .await
            .map_err(BuildError::transfer)?;

        // 書き込まれたサイズがローカルのアーカイブと一致するか確認
        if receipt.content_length != archive.size() {
            return Err(BuildError::transfer(CloudError::UploadNotConfirmed(format!(
                "uploaded {} of {} bytes",
                receipt.content_length,
                archive.size()
            ))));
        }

        tracing::info!(
            "Uploaded source archive to {} (etag {:?})",
            location.display_url(),
            receipt.etag
        );
        self.sink.append_line("   Upload complete");
        Ok(destination.relative_path.clone())
    }
}
