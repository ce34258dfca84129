//! Cardsync Core Library
//!
//! Wi-Fi SD 卡（FlashAir 兼容 CGI 接口）的同步客户端核心库
//!
//! # 模块
//!
//! - **codec**: FAT 日期时间、CID 寄存器、文件签名
//! - **card**: 文件列表条目、卡片标识与能力
//! - **wifi**: 传输期间的链路断开监视
//! - **transfer**: 设备命令、下载引擎、本地保存
//! - **workflow**: 完整的同步流程
//!
//! # 使用示例
//!
//! ```ignore
//! use cardsync_core::{
//!     AppSettings, CardState, DownloadEngine, NetworkMonitor, SimpleSyncCallback,
//!     SyncOptions, Synchronizer, SystemNetworkProvider,
//! };
//!
//! let settings = AppSettings::load();
//! let provider = SystemNetworkProvider::connect(&settings.remote_root).await;
//! let monitor = NetworkMonitor::new(Arc::new(provider), settings.monitor_interval());
//! let engine = DownloadEngine::new(
//!     &settings.remote_root,
//!     Arc::new(CardState::new()),
//!     monitor,
//!     settings.engine_options(),
//! )?;
//!
//! let (callback, mut events) = SimpleSyncCallback::new();
//! let mut sync = Synchronizer::new(engine, SyncOptions::from_settings(&settings));
//! sync.run(&cancel, &callback).await?;
//! ```

pub mod card;
pub mod codec;
pub mod config;
pub mod logging;
pub mod transfer;
pub mod wifi;
pub mod workflow;

// Card re-exports
pub use card::{
    Capabilities, Capacity, CardChanges, CardInfo, CardSnapshot, CardState, FileKind,
    RemoteFileEntry, SortOrder,
};

// Codec re-exports
pub use codec::{CidInfo, Signature};

pub use config::{AppSettings, SyncFilter};
pub use logging::{LogEntry, LogLevel};

// Transfer re-exports
pub use transfer::{
    Download, DownloadEngine, EngineOptions, LocalWriteError, ProgressCallback, ProgressInfo,
    RemoteError, RemoteResult,
};

// WiFi re-exports
pub use wifi::{MonitorMode, NetworkMonitor, NetworkStateProvider, SystemNetworkProvider};

// Workflow re-exports
pub use workflow::{
    SimpleSyncCallback, SyncError, SyncEvent, SyncOptions, SyncProgressCallback, SyncReport,
    Synchronizer, list_recursive,
};
