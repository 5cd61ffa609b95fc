use super::{EXIT_CANCELED, RegistryArgs};
use colored::Colorize;
use quickbuild_build::{ConsoleSink, LogOutcome, LogStreamer};
use quickbuild_cloud::BuildHandle;
use quickbuild_config::Settings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    settings: &Settings,
    target: &RegistryArgs,
    build_id: String,
    no_follow: bool,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let registry = super::registry_identity(settings, target)?;
    let (service, blobs) = super::connect(settings)?;
    let handle = BuildHandle::new(build_id);

    println!("{}", format!("=== Build {} のログ ===", handle).bold());

    let sink = Arc::new(ConsoleSink::new(&registry.registry_name));
    sink.set_message(&format!("Streaming logs of {}...", handle));

    let outcome = LogStreamer::new(
        service,
        blobs,
        sink.clone(),
        super::log_options(settings, no_follow),
    )
    .with_cancellation(cancel)
    .stream(&registry, &handle)
    .await;

    let code = match outcome {
        LogOutcome::Completed { status } => {
            match status {
                Some(s) if !s.is_success() => sink.finish_error(&format!("Build {}: {}", handle, s)),
                Some(s) => sink.finish_success(&format!("Build {}: {}", handle, s)),
                None => sink.finish_success("Log stream completed"),
            }
            super::status_exit_code(status)
        }
        LogOutcome::Failed(message) => {
            sink.finish_error(&message);
            1
        }
        LogOutcome::Canceled => {
            sink.finish_error("Canceled");
            EXIT_CANCELED
        }
    };

    Ok(code)
}
