pub mod build;
pub mod logs;

use anyhow::Context;
use quickbuild_build::LogOptions;
use quickbuild_cloud::{
    BlobStore, BuildService, BuildStatus, RegistryBuildClient, RegistryClientConfig,
    RegistryIdentity, RetryConfig, SasBlobClient,
};
use quickbuild_config::Settings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Ctrl-C で中断された場合の終了コード
pub const EXIT_CANCELED: i32 = 130;

/// ビルド先レジストリの指定
#[derive(clap::Args, Debug, Clone)]
pub struct RegistryArgs {
    /// レジストリ名
    #[arg(short = 'r', long)]
    pub registry: String,
    /// リソースグループ
    #[arg(short = 'g', long = "resource-group")]
    pub resource_group: String,
    /// サブスクリプションID（省略時は設定ファイルまたは QUICKBUILD_SUBSCRIPTION_ID）
    #[arg(long)]
    pub subscription: Option<String>,
}

pub fn registry_identity(
    settings: &Settings,
    args: &RegistryArgs,
) -> anyhow::Result<RegistryIdentity> {
    let subscription = args
        .subscription
        .clone()
        .or_else(|| settings.subscription_id.clone())
        .context(
            "サブスクリプションIDが指定されていません（--subscription または QUICKBUILD_SUBSCRIPTION_ID）",
        )?;

    Ok(RegistryIdentity::new(
        subscription,
        &args.resource_group,
        &args.registry,
    ))
}

pub fn retry_config(settings: &Settings) -> RetryConfig {
    RetryConfig {
        max_attempts: settings.retry.max_attempts,
        initial_delay: settings.retry.initial_delay(),
        max_delay: settings.retry.max_delay(),
        backoff_multiplier: settings.retry.backoff_multiplier,
    }
}

pub fn log_options(settings: &Settings, no_follow: bool) -> LogOptions {
    LogOptions {
        follow: settings.logs.follow && !no_follow,
        poll_interval: settings.logs.poll_interval(),
    }
}

/// ビルドサービスとストレージのクライアントを作成
pub fn connect(settings: &Settings) -> anyhow::Result<(Arc<dyn BuildService>, Arc<dyn BlobStore>)> {
    let token = settings.access_token.clone().context(
        "アクセストークンが設定されていません（QUICKBUILD_ACCESS_TOKEN または設定ファイルの access_token）",
    )?;

    let retry = retry_config(settings);
    let config = RegistryClientConfig::new(token)
        .with_endpoint(&settings.management_endpoint)
        .with_api_version(&settings.api_version)
        .with_retry(retry.clone());

    let service = RegistryBuildClient::new(config)?;
    let blobs = SasBlobClient::new(retry);
    Ok((Arc::new(service), Arc::new(blobs)))
}

/// Ctrl-C でキャンセルされるトークン
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, canceling");
            trigger.cancel();
        }
    });
    token
}

/// 終了したビルドのステータスに対応する終了コード
pub fn status_exit_code(status: Option<BuildStatus>) -> i32 {
    match status {
        Some(status) if !status.is_success() => 1,
        _ => 0,
    }
}
