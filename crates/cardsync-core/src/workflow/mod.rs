//! 工作流模块
//!
//! 提供高层 API 封装完整的同步流程

pub mod sync;

pub use sync::{
    SimpleSyncCallback, SyncError, SyncEvent, SyncOptions, SyncProgressCallback, SyncReport,
    Synchronizer, list_recursive,
};
