//! 同步工作流
//!
//! 高层 API 封装完整的同步流程:
//! 1. 读取卡片标识，判断卡片是否被更换
//! 2. 询问卡片自上次检查后是否有写入
//! 3. 深度优先列出全部文件（一次只向设备发一个请求）
//! 4. 按设置过滤、排序，逐个下载并保存
//! 5. 可选: 保存成功后删除设备上的文件

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::card::{Capabilities, CardSnapshot, RemoteFileEntry, SortOrder, sort_entries};
use crate::codec::Signature;
use crate::config::{AppSettings, SyncFilter};
use crate::logging::{LogEntry, LogLevel};
use crate::transfer::writer::{self, LocalWriteError};
use crate::transfer::{DownloadEngine, ProgressInfo, RemoteError, RemoteResult};

/// 同步进度回调
pub trait SyncProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, entry: &LogEntry);
    /// 单个文件的下载进度
    fn on_progress(&self, file: &RemoteFileEntry, progress: ProgressInfo);
    /// 文件已保存到本地
    fn on_file_saved(&self, file: &RemoteFileEntry, local_path: &Path);
    /// 失败（不一定终止同步）
    fn on_error(&self, error: &SyncError);
}

/// 同步错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Local(#[from] LocalWriteError),
}

impl SyncError {
    /// 面向用户的状态文本
    pub fn status_text(&self) -> String {
        match self {
            SyncError::Remote(e) => e.status_text().to_string(),
            SyncError::Local(e) => format!("保存失败: {e}"),
        }
    }
}

/// 同步选项
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 本地保存目录
    pub local_folder: PathBuf,
    pub sort_order: SortOrder,
    pub filter: SyncFilter,
    /// 按日期建立子目录
    pub make_dated_folder: bool,
    /// 保存后删除设备上的文件
    pub delete_on_copy: bool,
    /// 检查间隔
    pub check_interval: Duration,
}

impl SyncOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            local_folder: settings.local_folder.clone(),
            sort_order: settings.sort_order(),
            filter: settings.sync_filter,
            make_dated_folder: settings.make_dated_folder,
            delete_on_copy: settings.delete_on_copy,
            check_interval: settings.check_interval(),
        }
    }

    /// 条目在本地的保存路径
    pub fn local_path(&self, entry: &RemoteFileEntry) -> PathBuf {
        let mut path = self.local_folder.clone();
        if self.make_dated_folder {
            if let Some(date) = entry.date() {
                path.push(dated_folder_name(&date));
            }
        }
        path.push(entry.file_name());
        path
    }
}

fn dated_folder_name(date: &NaiveDateTime) -> String {
    date.format("%Y%m%d").to_string()
}

/// 一次同步的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// 卡片自上次检查后是否有写入（无写入时不列目录）
    pub updated: bool,
    /// 过滤后的候选文件数
    pub listed: usize,
    pub downloaded: usize,
    /// 本会话已同步或本地已存在
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// 同步工作流
pub struct Synchronizer {
    engine: DownloadEngine,
    options: SyncOptions,
    /// 本会话已保存的文件
    synced: HashSet<Signature>,
    /// 下次检查必须完整列出（首次检查或上次失败）
    needs_listing: bool,
}

impl Synchronizer {
    pub fn new(engine: DownloadEngine, options: SyncOptions) -> Self {
        Self {
            engine,
            options,
            synced: HashSet::new(),
            needs_listing: true,
        }
    }

    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// 读取卡片标识并刷新状态，返回卡片自上次检查后是否有写入
    ///
    /// 读取顺序固定为 固件版本、SSID、CID。检测到卡片被更换时返回
    /// [`RemoteError::CardChanged`]。
    pub async fn check_card(&self, cancel: &CancellationToken) -> RemoteResult<bool> {
        let engine = &self.engine;
        let card_state = engine.card_state();

        let firmware_version = engine.get_firmware_version(cancel).await?;
        let ssid = engine.get_ssid(cancel).await?;
        let capabilities = Capabilities::for_firmware(&firmware_version);
        let cid = if capabilities.can_get_cid {
            Some(engine.get_cid(cancel).await?)
        } else {
            None
        };
        let is_wireless_connected = self.is_wireless_connected(&ssid).await;

        let changes = card_state.update(CardSnapshot {
            firmware_version,
            ssid,
            cid,
            is_wireless_connected,
        });
        if changes.is_changed() == Some(true) {
            warn!("Card identity changed: {:?}", changes);
            return Err(RemoteError::CardChanged);
        }

        if capabilities.can_get_capacity {
            card_state.set_capacity(engine.get_capacity(cancel).await?);
        }
        if capabilities.can_get_upload {
            card_state.set_upload_enabled(engine.get_upload_enabled(cancel).await?);
        }

        let updated = if capabilities.can_get_write_timestamp {
            let timestamp = engine.get_write_timestamp(cancel).await?;
            card_state.set_write_timestamp(timestamp) != Some(false)
        } else {
            engine.check_update_status(cancel).await?
        };

        Ok(updated || self.needs_listing)
    }

    async fn is_wireless_connected(&self, ssid: &str) -> bool {
        if ssid.is_empty() {
            return false;
        }
        match self.engine.monitor().provider().wireless_ssids().await {
            Ok(ssids) => ssids.iter().any(|s| s == ssid),
            Err(e) => {
                debug!("Cannot read wireless state: {:#}", e);
                false
            }
        }
    }

    /// 列出卡片上的全部文件，按设置过滤排序
    pub async fn list_all(&self, cancel: &CancellationToken) -> RemoteResult<Vec<RemoteFileEntry>> {
        let mut files = list_recursive(&self.engine, "/", cancel).await?;
        files.retain(|entry| self.options.filter.accepts(entry));
        sort_entries(&mut files, self.options.sort_order);
        Ok(files)
    }

    /// 执行一次检查与同步
    pub async fn sync_once<C: SyncProgressCallback>(
        &mut self,
        cancel: &CancellationToken,
        callback: &C,
    ) -> Result<SyncReport, SyncError> {
        let result = self.sync_cycle(cancel, callback).await;
        self.needs_listing = result.is_err();
        result
    }

    async fn sync_cycle<C: SyncProgressCallback>(
        &mut self,
        cancel: &CancellationToken,
        callback: &C,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        callback.on_status(&LogEntry::info("正在检查卡片..."));
        report.updated = self.check_card(cancel).await?;
        if !report.updated {
            debug!("No writes on card since last check");
            callback.on_status(&LogEntry::info("卡片没有新文件"));
            return Ok(report);
        }

        callback.on_status(&LogEntry::info("正在读取文件列表..."));
        let files = self.list_all(cancel).await?;
        report.listed = files.len();
        info!("{} files on card", files.len());

        let mut deletion_disabled = false;

        for entry in &files {
            if entry.signature().is_some_and(|s| self.synced.contains(s)) {
                report.skipped += 1;
                continue;
            }

            let local_path = self.options.local_path(entry);
            if writer::is_same_size(&local_path, entry.size()).await {
                debug!("{} already exists locally", local_path.display());
                self.remember(entry);
                report.skipped += 1;
                continue;
            }

            callback.on_status(&LogEntry::info(format!("正在下载 {}", entry.file_path())));
            let on_progress = |progress: ProgressInfo| callback.on_progress(entry, progress);
            let result = self
                .engine
                .download_file(
                    &entry.file_path(),
                    Some(entry.size()),
                    cancel,
                    Some(&on_progress),
                )
                .await;

            // 单个文件的问题不影响后面的文件，链路问题结束本周期
            let download = match result {
                Ok(download) => download,
                Err(e @ (RemoteError::FileNotFound { .. } | RemoteError::FileInvalid { .. })) => {
                    warn!("Skipping {}: {}", entry.file_path(), e);
                    callback.on_error(&SyncError::Remote(e));
                    report.failed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if let Err(e) = writer::save_file(&local_path, &download.data, false).await {
                warn!("Failed to save {}: {}", local_path.display(), e);
                callback.on_error(&SyncError::Local(e));
                report.failed += 1;
                continue;
            }

            self.remember(entry);
            report.downloaded += 1;
            callback.on_file_saved(entry, &local_path);

            if self.options.delete_on_copy && !deletion_disabled {
                match self.engine.delete_file(&entry.file_path(), cancel).await {
                    Ok(()) => report.deleted += 1,
                    Err(RemoteError::CardUploadDisabled) => {
                        deletion_disabled = true;
                        callback.on_error(&SyncError::Remote(RemoteError::CardUploadDisabled));
                    }
                    Err(e @ RemoteError::FileDeletionFailed { .. }) => {
                        report.failed += 1;
                        callback.on_error(&SyncError::Remote(e));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        callback.on_status(&LogEntry::info(format!(
            "同步完成: 下载 {} 个，跳过 {} 个",
            report.downloaded, report.skipped
        )));
        Ok(report)
    }

    fn remember(&mut self, entry: &RemoteFileEntry) {
        if let Some(signature) = entry.signature() {
            self.synced.insert(*signature);
        }
    }

    /// 按间隔循环同步，直到取消或卡片被更换
    ///
    /// 其他失败只结束当前周期，下一周期重新完整列出。
    pub async fn run<C: SyncProgressCallback>(
        &mut self,
        cancel: &CancellationToken,
        callback: &C,
    ) -> Result<(), SyncError> {
        loop {
            match self.sync_once(cancel, callback).await {
                Ok(report) => debug!("Sync cycle finished: {:?}", report),
                Err(SyncError::Remote(RemoteError::Cancelled)) => break,
                Err(SyncError::Remote(RemoteError::CardChanged)) => {
                    let error = SyncError::Remote(RemoteError::CardChanged);
                    callback.on_error(&error);
                    callback.on_status(&LogEntry::new(LogLevel::Error, error.status_text()));
                    return Err(error);
                }
                Err(e) => {
                    warn!("Sync cycle failed: {}", e);
                    callback.on_error(&e);
                    callback.on_status(&LogEntry::new(LogLevel::Warn, e.status_text()));
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.options.check_interval) => {}
            }
        }

        callback.on_status(&LogEntry::info("同步已停止"));
        Ok(())
    }
}

/// 深度优先列出目录下的全部文件（不含目录与设备自用文件）
///
/// 使用显式栈，一次只向设备发一个请求。空目录不出现在结果中。
pub async fn list_recursive(
    engine: &DownloadEngine,
    root: &str,
    cancel: &CancellationToken,
) -> RemoteResult<Vec<RemoteFileEntry>> {
    let mut pending = vec![root.to_string()];
    let mut files = Vec::new();

    while let Some(directory) = pending.pop() {
        let entries = engine.get_file_list(&directory, cancel).await?;

        let mut subdirectories = Vec::new();
        for entry in entries {
            if entry.is_housekeeping() {
                continue;
            }
            if entry.is_directory() {
                subdirectories.push(entry.file_path());
            } else if !entry.attributes().volume {
                files.push(entry);
            }
        }

        // 逆序压栈以保持列表顺序
        pending.extend(subdirectories.into_iter().rev());
    }

    Ok(files)
}

/// 简化的同步回调实现
pub struct SimpleSyncCallback {
    tx: mpsc::Sender<SyncEvent>,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Status(LogEntry),
    Progress { path: String, progress: ProgressInfo },
    Saved { path: String, local_path: PathBuf },
    Error(String),
}

impl SimpleSyncCallback {
    pub fn new() -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }
}

impl SyncProgressCallback for SimpleSyncCallback {
    fn on_status(&self, entry: &LogEntry) {
        let _ = self.tx.try_send(SyncEvent::Status(entry.clone()));
    }

    fn on_progress(&self, file: &RemoteFileEntry, progress: ProgressInfo) {
        let _ = self.tx.try_send(SyncEvent::Progress {
            path: file.file_path(),
            progress,
        });
    }

    fn on_file_saved(&self, file: &RemoteFileEntry, local_path: &Path) {
        let _ = self.tx.try_send(SyncEvent::Saved {
            path: file.file_path(),
            local_path: local_path.to_path_buf(),
        });
    }

    fn on_error(&self, error: &SyncError) {
        let _ = self.tx.try_send(SyncEvent::Error(error.status_text()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dated: bool) -> SyncOptions {
        SyncOptions {
            local_folder: PathBuf::from("/photos"),
            sort_order: SortOrder::OldestFirst,
            filter: SyncFilter::All,
            make_dated_folder: dated,
            delete_on_copy: false,
            check_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_local_path() {
        // 17441 = 2014-01-01
        let entry = RemoteFileEntry::parse("/DCIM/100__TSB,DSC_0001.JPG,100,32,17441,18650", None);
        assert_eq!(
            options(false).local_path(&entry),
            PathBuf::from("/photos/DSC_0001.JPG")
        );
        assert_eq!(
            options(true).local_path(&entry),
            PathBuf::from("/photos/20140101/DSC_0001.JPG")
        );

        // 无效日期时不建立子目录
        let undated = RemoteFileEntry::parse("/DCIM/100__TSB,DSC_0002.JPG,100,32,0,0", None);
        assert_eq!(
            options(true).local_path(&undated),
            PathBuf::from("/photos/DSC_0002.JPG")
        );
    }

    #[test]
    fn test_options_from_settings() {
        let settings = AppSettings {
            order_from_newest: true,
            delete_on_copy: true,
            check_interval_secs: 5,
            ..Default::default()
        };
        let options = SyncOptions::from_settings(&settings);
        assert_eq!(options.sort_order, SortOrder::NewestFirst);
        assert!(options.delete_on_copy);
        assert_eq!(options.check_interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_simple_callback_events() {
        let (callback, mut rx) = SimpleSyncCallback::new();
        callback.on_status(&LogEntry::info("正在检查卡片..."));
        callback.on_error(&SyncError::Remote(RemoteError::ConnectionLost));

        match rx.recv().await.unwrap() {
            SyncEvent::Status(entry) => assert_eq!(entry.message, "正在检查卡片..."),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            SyncEvent::Error(text) => assert_eq!(text, "与卡片的连接已断开"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
