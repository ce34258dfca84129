//! Cardsync CLI
//!
//! 命令行客户端，直接与卡片通信

mod commands;

use anyhow::Result;
use cardsync_core::{AppSettings, CardState, DownloadEngine, NetworkMonitor, SystemNetworkProvider};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cardsync", version, about = "Wi-Fi SD 卡同步工具")]
struct Cli {
    /// 配置文件路径 (默认: ~/.config/cardsync/settings.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 设备根 URL (覆盖配置文件)
    #[arg(short, long, global = true)]
    remote: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 查看卡片信息
    Info,
    /// 列出目录
    List {
        /// 远程目录 (默认: 根目录)
        #[arg(default_value = "/")]
        dir: String,
        /// 递归列出所有子目录中的文件
        #[arg(short = 'R', long)]
        recursive: bool,
    },
    /// 下载单个文件
    Download {
        /// 远程文件路径
        remote: String,
        /// 本地保存路径
        local: PathBuf,
        /// 覆盖已存在的文件
        #[arg(long)]
        overwrite: bool,
    },
    /// 下载缩略图
    Thumbnail {
        /// 远程文件路径 (JPEG)
        remote: String,
        /// 本地保存路径
        local: PathBuf,
    },
    /// 删除卡片上的文件
    Delete {
        /// 远程文件路径
        remote: String,
    },
    /// 同步卡片到本地目录
    Sync {
        /// 只同步一次
        #[arg(long)]
        once: bool,
        /// 本地保存目录 (覆盖配置文件)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },
}

fn init_logging() {
    // 将 log 记录转发到 tracing
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cardsync_core=debug")),
        )
        .try_init();
}

fn load_settings(cli: &Cli) -> AppSettings {
    let mut settings = match &cli.config {
        Some(path) => AppSettings::load_from(path),
        None => AppSettings::load(),
    };
    if let Some(remote) = &cli.remote {
        settings.remote_root = remote.clone();
    }
    settings.normalize();
    settings
}

async fn build_engine(settings: &AppSettings) -> Result<DownloadEngine> {
    let provider = SystemNetworkProvider::connect(&settings.remote_root).await;
    let monitor = NetworkMonitor::new(Arc::new(provider), settings.monitor_interval());
    let engine = DownloadEngine::new(
        &settings.remote_root,
        Arc::new(CardState::new()),
        monitor,
        settings.engine_options(),
    )?;
    Ok(engine)
}

/// Ctrl-C 时取消当前操作
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, cancelling");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli);
    tracing::debug!("Using remote root {}", settings.remote_root);

    if let Commands::Sync {
        dest: Some(dest), ..
    } = &cli.command
    {
        settings.local_folder = dest.clone();
    }

    let engine = build_engine(&settings).await?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Info => commands::info(engine, &settings, &cancel).await?,
        Commands::List { dir, recursive } => {
            commands::list(&engine, &settings, &dir, recursive, &cancel).await?;
        }
        Commands::Download {
            remote,
            local,
            overwrite,
        } => commands::download(&engine, &remote, &local, overwrite, &cancel).await?,
        Commands::Thumbnail { remote, local } => {
            commands::thumbnail(&engine, &remote, &local, &cancel).await?;
        }
        Commands::Delete { remote } => {
            commands::delete(engine, &settings, &remote, &cancel).await?;
        }
        Commands::Sync { once, .. } => commands::sync(engine, &settings, once, &cancel).await?,
    }

    Ok(())
}
