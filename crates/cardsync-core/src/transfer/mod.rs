//! 与设备的 HTTP 通信
//!
//! 包含:
//! - 设备 CGI 命令 URL
//! - 错误分类
//! - 下载进度
//! - 下载引擎（重试、取消、链路监视）
//! - 本地文件保存

pub mod command;
pub mod engine;
pub mod error;
pub mod progress;
pub mod writer;

pub use command::Command;
pub use engine::{Download, DownloadEngine, EngineOptions, MAX_ATTEMPTS};
pub use error::{Phase, RemoteError, RemoteResult, UnableCause};
pub use progress::{ProgressCallback, ProgressInfo};
pub use writer::{LocalWriteError, save_file};
