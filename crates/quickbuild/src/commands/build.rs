use super::{EXIT_CANCELED, RegistryArgs};
use colored::Colorize;
use quickbuild_build::{
    BuildError, BuildParameters, BuildPipeline, ConsoleSink, LogOutcome, PipelineOptions,
};
use quickbuild_config::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct BuildArgs {
    pub target: RegistryArgs,
    pub source: PathBuf,
    pub file: Option<PathBuf>,
    pub images: Vec<String>,
    pub no_push: bool,
    pub keep_archive: bool,
    pub no_follow: bool,
    pub timeout: Option<u32>,
}

pub async fn handle(
    settings: &Settings,
    args: BuildArgs,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let registry = super::registry_identity(settings, &args.target)?;
    let (service, blobs) = super::connect(settings)?;

    let source_directory = std::path::absolute(&args.source)?;
    let params = BuildParameters {
        registry,
        source_directory,
        dockerfile_path: args.file,
        image_names: args.images,
        push: settings.push && !args.no_push,
    };
    let options = PipelineOptions {
        keep_archive: settings.keep_archive || args.keep_archive,
        timeout_secs: args.timeout.or(settings.build_timeout_secs),
        logs: super::log_options(settings, args.no_follow),
    };

    println!(
        "{} {} にビルドを投入します",
        "→".blue(),
        params.registry.registry_name.cyan()
    );

    let sink = Arc::new(ConsoleSink::new(&params.registry.registry_name));
    let pipeline = BuildPipeline::new(service, blobs, sink.clone())
        .with_options(options)
        .with_cancellation(cancel);

    match pipeline.run(&params).await {
        Ok(queued) => {
            let id = queued.handle.build_id().to_string();
            match queued.logs {
                LogOutcome::Completed { status } => {
                    match status {
                        Some(s) if !s.is_success() => {
                            sink.finish_error(&format!("Build {} finished: {}", id, s))
                        }
                        Some(s) => sink.finish_success(&format!("Build {} finished: {}", id, s)),
                        None => sink.finish_success(&format!("Build {} queued", id)),
                    }
                    Ok(super::status_exit_code(status))
                }
                LogOutcome::Failed(_) => {
                    // ログが取れなくてもビルドは投入済み
                    sink.finish_success(&format!("Build {} queued (logs unavailable)", id));
                    println!("  qb logs {} で後からログを確認できます", id);
                    Ok(0)
                }
                LogOutcome::Canceled => {
                    sink.finish_error(&format!("Stopped following build {}", id));
                    Ok(EXIT_CANCELED)
                }
            }
        }
        Err(BuildError::Canceled) => {
            sink.finish_error("Build canceled");
            Ok(EXIT_CANCELED)
        }
        Err(e) => {
            sink.finish_error("Build failed");
            eprintln!("{} {}", "Error:".red().bold(), e.user_message());
            Ok(1)
        }
    }
}
