mod commands;

use clap::{Parser, Subcommand};
use commands::RegistryArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qb")]
#[command(about = "ローカルのソースからレジストリ上でイメージをビルドする", long_about = None)]
struct Cli {
    /// デバッグログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ソースをアップロードしてクイックビルドを実行
    Build {
        #[command(flatten)]
        target: RegistryArgs,
        /// ソースディレクトリ
        #[arg(short, long, default_value = ".")]
        source: PathBuf,
        /// Dockerfile のパス（省略時は {source}/Dockerfile）
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
        /// イメージ名 (name[:tag])、複数指定可
        #[arg(short = 't', long = "image", required = true)]
        images: Vec<String>,
        /// ビルド後にイメージをプッシュしない
        #[arg(long)]
        no_push: bool,
        /// アップロード後もソースアーカイブを残す
        #[arg(long)]
        keep_archive: bool,
        /// ビルドの終了を待たずにログ転送を終える
        #[arg(long)]
        no_follow: bool,
        /// ビルドのタイムアウト秒数 (300-28800)
        #[arg(long)]
        timeout: Option<u32>,
    },
    /// 既存ビルドのログを表示
    Logs {
        /// ビルドID
        build_id: String,
        #[command(flatten)]
        target: RegistryArgs,
        /// 現在のログだけを表示して終了
        #[arg(long)]
        no_follow: bool,
    },
    /// バージョン情報を表示
    Version,
}

/// stderr にログを出す（stdout はビルド出力用）
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("quickbuild {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = quickbuild_config::load_settings()?;
    tracing::debug!("Loaded settings: {:?}", settings);

    let cancel = commands::cancel_on_ctrl_c();

    let exit_code = match cli.command {
        Commands::Build {
            target,
            source,
            file,
            images,
            no_push,
            keep_archive,
            no_follow,
            timeout,
        } => {
            let args = commands::build::BuildArgs {
                target,
                source,
                file,
                images,
                no_push,
                keep_archive,
                no_follow,
                timeout,
            };
            commands::build::handle(&settings, args, cancel).await?
        }
        Commands::Logs {
            build_id,
            target,
            no_follow,
        } => commands::logs::handle(&settings, &target, build_id, no_follow, cancel).await?,
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
