//! ビルドログのストリーミング
//!
//! ログの場所はビルド中にローテーションすることがあるため、ストリームが
//! 終わるたびにステータスを確認し、終端状態でなければ場所を解決し直して
//! 前回までのオフセットから読み直します。
//! ログの失敗はビルドの失敗ではなく、1行だけ報告して終了します。

use crate::status::StatusSink;
use futures_util::StreamExt;
use quickbuild_cloud::{
    BlobLocation, BlobStore, BuildHandle, BuildService, BuildStatus, ByteStream, CloudError,
    RegistryIdentity,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// ストリーミングの設定
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// 終端状態になるまで読み直し続けるか
    pub follow: bool,
    pub poll_interval: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: true,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// ストリーミングの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    /// ストリームが完了した（follow 時は終端ステータス付き）
    Completed { status: Option<BuildStatus> },
    /// 失敗を報告して終了した
    Failed(String),
    Canceled,
}

impl LogOutcome {
    pub fn status(&self) -> Option<BuildStatus> {
        match self {
            LogOutcome::Completed { status } => *status,
            _ => None,
        }
    }
}

/// チャンク境界で分割された UTF-8 を次のチャンクに持ち越すデコーダ
#[derive(Debug, Default)]
struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        if complete == 0 {
            return None;
        }

        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        Some(text)
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

fn trim_trailing_newline(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

enum Drain {
    Ended,
    Failed(String),
    Canceled,
}

pub struct LogStreamer {
    service: Arc<dyn BuildService>,
    blobs: Arc<dyn BlobStore>,
    sink: Arc<dyn StatusSink>,
    options: LogOptions,
    cancel: CancellationToken,
}

impl LogStreamer {
    pub fn new(
        service: Arc<dyn BuildService>,
        blobs: Arc<dyn BlobStore>,
        sink: Arc<dyn StatusSink>,
        options: LogOptions,
    ) -> Self {
        Self {
            service,
            blobs,
            sink,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// ビルドログをステータス出力先に転送する
    pub async fn stream(&self, registry: &RegistryIdentity, build: &BuildHandle) -> LogOutcome {
        let mut offset = 0u64;
        let mut decoder = ChunkDecoder::default();

        loop {
            let location = match self.open_location(registry, build).await {
                Some(Ok(location)) => location,
                Some(Err(message)) => return self.fail(message),
                None => return self.canceled(build),
            };

            match self.drain(build, &location, &mut offset, &mut decoder).await {
                Drain::Ended => {}
                Drain::Failed(message) => return self.fail(message),
                Drain::Canceled => return self.canceled(build),
            }

            if !self.options.follow {
                self.flush(&mut decoder);
                self.sink
                    .append_line(&format!("Build {} log stream has completed", build));
                self.sink.show();
                return LogOutcome::Completed { status: None };
            }

            let status = match self
                .cancellable(self.service.get_build_status(registry, build))
                .await
            {
                Some(Ok(status)) => status,
                Some(Err(e)) => {
                    return self.fail(format!("Failed to get status of build {}: {}", build, e));
                }
                None => return self.canceled(build),
            };

            if status.is_terminal() {
                // 終端状態の確認までに追記された分を読み切る
                if let Drain::Failed(message) =
                    self.drain(build, &location, &mut offset, &mut decoder).await
                {
                    tracing::debug!("Final log read for build {} failed: {}", build, message);
                }
                self.flush(&mut decoder);
                self.sink
                    .append_line(&format!("Build {} has completed: {}", build, status));
                self.sink.show();
                return LogOutcome::Completed {
                    status: Some(status),
                };
            }

            tracing::debug!(
                "Build {} is {}; reopening log at byte {}",
                build,
                status,
                offset
            );
            if self
                .cancellable(tokio::time::sleep(self.options.poll_interval))
                .await
                .is_none()
            {
                return self.canceled(build);
            }
        }
    }

    async fn open_location(
        &self,
        registry: &RegistryIdentity,
        build: &BuildHandle,
    ) -> Option<Result<BlobLocation, String>> {
        let location = self
            .cancellable(self.service.get_log_location(registry, build))
            .await?;
        Some(
            location
                .and_then(|l| BlobLocation::parse(&l.log_link))
                .map_err(|e| format!("Failed to get log link for build {}: {}", build, e)),
        )
    }

    async fn drain(
        &self,
        build: &BuildHandle,
        location: &BlobLocation,
        offset: &mut u64,
        decoder: &mut ChunkDecoder,
    ) -> Drain {
        let mut stream: ByteStream = match self
            .cancellable(self.blobs.open_read_stream(location, *offset))
            .await
        {
            Some(Ok(stream)) => stream,
            // ビルド開始前はログがまだ作られていない
            Some(Err(CloudError::ResourceNotFound(_))) if self.options.follow => {
                tracing::debug!("Log of build {} does not exist yet", build);
                return Drain::Ended;
            }
            Some(Err(e)) => {
                return Drain::Failed(format!(
                    "Failed to open log stream for build {}: {}",
                    build, e
                ));
            }
            None => return Drain::Canceled,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Drain::Canceled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    *offset += chunk.len() as u64;
                    if let Some(text) = decoder.push(&chunk) {
                        self.emit(&text);
                    }
                }
                Some(Err(e)) => {
                    self.flush(decoder);
                    return Drain::Failed(format!("Log stream for build {} failed: {}", build, e));
                }
                None => return Drain::Ended,
            }
        }
    }

    fn emit(&self, text: &str) {
        self.sink.append_line(trim_trailing_newline(text));
        self.sink.show();
    }

    fn flush(&self, decoder: &mut ChunkDecoder) {
        if let Some(text) = decoder.finish() {
            self.emit(&text);
        }
    }

    fn fail(&self, message: String) -> LogOutcome {
        tracing::warn!("{}", message);
        self.sink.append_error(&message);
        self.sink.show();
        LogOutcome::Failed(message)
    }

    fn canceled(&self, build: &BuildHandle) -> LogOutcome {
        self.sink
            .append_line(&format!("Stopped streaming logs for build {}", build));
        LogOutcome::Canceled
    }

    async fn cancellable<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = future => Some(output),
        }
    }
}
