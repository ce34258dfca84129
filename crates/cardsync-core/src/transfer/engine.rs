//! 下载引擎
//!
//! 负责与设备的全部 HTTP 通信：组合命令 URL、发出请求、
//! 带进度地读取响应体、把传输层失败归类为 [`RemoteError`]，
//! 并在内部重试"无法连接"类失败。
//!
//! # 单次请求的状态
//!
//! ```text
//! ISSUE -> HEADERS_RECEIVED -> STREAMING -> COMPLETE
//!    \-> (timeout / cancel / disconnect) -> FAILED
//! ```
//!
//! 每个请求期间都运行一个 [`NetworkMonitor`]，它只取消本次请求，
//! 不影响调用方的取消令牌。同一时刻三种原因都可能表现为连接被中断，
//! 归类时按 调用方取消 > 链路断开 > 阶段超时 > 传输错误 的顺序判定。
//!
//! 设备的嵌入式服务器无法可靠处理并发请求，调用方应串行使用引擎。

use futures_util::TryStreamExt;
use log::{debug, info, warn};
use reqwest::StatusCode;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::card::{Capacity, CardState, FileKind, RemoteFileEntry, entry::normalize_directory};
use crate::transfer::command::{Command, normalize_root};
use crate::transfer::error::{Phase, RemoteError, RemoteResult, UnableCause};
use crate::transfer::progress::{ProgressCallback, ProgressInfo, ProgressSchedule};
use crate::wifi::monitor::{MonitorGuard, MonitorMode, NetworkMonitor};

/// 每次读取的块大小
const CHUNK_SIZE: usize = 64 * 1024;

/// "无法连接"失败的最大尝试次数
pub const MAX_ATTEMPTS: u32 = 3;

/// 文件列表响应的首行
const FILE_LIST_HEADER: &str = "WLANSD_FILELIST";

/// 删除成功时设备返回的文本
const DELETE_SUCCESS: &str = "SUCCESS";

/// 设备文件大小上限 (`i32::MAX`，与列表中的大小字段一致)
const MAX_CONTENT_LENGTH: u64 = 0x7FFF_FFFF;

/// 响应体缓冲区的最大预分配
const MAX_PREALLOCATION: u64 = 4 * 1024 * 1024;

/// 引擎时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// 等待响应头的时间
    pub header_timeout: Duration,
    /// 等待下一块响应体的时间
    pub chunk_timeout: Duration,
    /// 两次重试之间的间隔
    pub retry_delay: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            header_timeout: Duration::from_secs(10),
            chunk_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// 下载结果
#[derive(Debug, Clone)]
pub struct Download {
    pub data: Vec<u8>,
    pub elapsed: Duration,
}

/// 下载引擎
pub struct DownloadEngine {
    client: reqwest::Client,
    remote_root: String,
    card_state: Arc<CardState>,
    monitor: NetworkMonitor,
    options: EngineOptions,
}

impl DownloadEngine {
    pub fn new(
        remote_root: &str,
        card_state: Arc<CardState>,
        monitor: NetworkMonitor,
        options: EngineOptions,
    ) -> RemoteResult<Self> {
        // 设备同一时刻只能可靠处理一个连接，不保留空闲连接
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| RemoteError::Unexpected(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            remote_root: normalize_root(remote_root),
            card_state,
            monitor,
            options,
        })
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    pub fn card_state(&self) -> &Arc<CardState> {
        &self.card_state
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// 列出目录中的条目（不递归）
    ///
    /// 无法解析的行会被记录并丢弃。
    pub async fn get_file_list(
        &self,
        directory: &str,
        cancel: &CancellationToken,
    ) -> RemoteResult<Vec<RemoteFileEntry>> {
        let directory = device_path(directory);
        let text = self.fetch_text(Command::FileList, &directory, cancel).await?;
        let prefix = normalize_directory(&directory);

        let entries: Vec<RemoteFileEntry> = text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty() && *line != FILE_LIST_HEADER)
            .map(|line| {
                // 根目录的行可能带有 `/` 前缀
                let line = if prefix.is_empty() && line.starts_with("/,") {
                    &line[1..]
                } else {
                    line
                };
                RemoteFileEntry::parse(line, Some(prefix))
            })
            .filter(|entry| {
                if !entry.is_imported() {
                    debug!("Dropping unparseable entry in {}: {:?}", directory, entry);
                }
                entry.is_imported()
            })
            .collect();

        debug!("Listed {} entries in {}", entries.len(), directory);
        Ok(entries)
    }

    /// 目录中的文件数
    pub async fn get_file_count(
        &self,
        directory: &str,
        cancel: &CancellationToken,
    ) -> RemoteResult<u32> {
        let directory = device_path(directory);
        let text = self.fetch_text(Command::FileCount, &directory, cancel).await?;
        parse_number(&text, "file count")
    }

    /// 获取缩略图
    ///
    /// 只有 JPEG 文件有缩略图；其他文件不发请求，直接返回
    /// [`RemoteError::Unexpected`]，因为这是调用方的使用错误而不是数据损坏。
    pub async fn get_thumbnail(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> RemoteResult<Vec<u8>> {
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if FileKind::from_extension(&extension) != FileKind::Jpeg {
            return Err(RemoteError::Unexpected(format!(
                "thumbnails are only available for JPEG files: {path}"
            )));
        }

        let download = self
            .fetch_with_retry(Command::Thumbnail, &device_path(path), None, cancel, None)
            .await?;
        Ok(download.data)
    }

    pub async fn get_firmware_version(&self, cancel: &CancellationToken) -> RemoteResult<String> {
        let text = self.fetch_text(Command::FirmwareVersion, "", cancel).await?;
        Ok(text.trim().to_string())
    }

    /// 读取 CID
    ///
    /// 旧固件不支持此命令，调用方应先根据固件版本判断。
    pub async fn get_cid(&self, cancel: &CancellationToken) -> RemoteResult<String> {
        let text = self.fetch_text(Command::Cid, "", cancel).await?;
        Ok(text.trim().to_string())
    }

    pub async fn get_ssid(&self, cancel: &CancellationToken) -> RemoteResult<String> {
        let text = self.fetch_text(Command::Ssid, "", cancel).await?;
        Ok(text.trim().to_string())
    }

    /// 剩余/总容量，响应无法解析时为 `None`
    pub async fn get_capacity(&self, cancel: &CancellationToken) -> RemoteResult<Option<Capacity>> {
        let text = self.fetch_text(Command::Capacity, "", cancel).await?;
        let capacity = Capacity::parse(&text);
        if capacity.is_none() {
            debug!("Unrecognized capacity response: {:?}", text);
        }
        Ok(capacity)
    }

    /// 卡片自上次查询后是否有更新
    pub async fn check_update_status(&self, cancel: &CancellationToken) -> RemoteResult<bool> {
        let text = self.fetch_text(Command::UpdateStatus, "", cancel).await?;
        Ok(text.trim() == "1")
    }

    /// 最后一次写入事件的时间戳
    pub async fn get_write_timestamp(&self, cancel: &CancellationToken) -> RemoteResult<i64> {
        let text = self.fetch_text(Command::WriteTimeStamp, "", cancel).await?;
        parse_number(&text, "write timestamp")
    }

    pub async fn get_upload_enabled(&self, cancel: &CancellationToken) -> RemoteResult<bool> {
        let text = self.fetch_text(Command::Upload, "", cancel).await?;
        Ok(text.trim() == "1")
    }

    /// 删除设备上的文件
    ///
    /// 固件能报告上传开关时，开关关闭则直接返回 [`RemoteError::CardUploadDisabled`]。
    pub async fn delete_file(&self, path: &str, cancel: &CancellationToken) -> RemoteResult<()> {
        if self.card_state.capabilities().can_get_upload {
            let enabled = self.get_upload_enabled(cancel).await?;
            self.card_state.set_upload_enabled(enabled);
            if !enabled {
                return Err(RemoteError::CardUploadDisabled);
            }
        }

        let path = device_path(path);
        let text = self.fetch_text(Command::Delete, &path, cancel).await?;
        if text.trim() != DELETE_SUCCESS {
            warn!("Delete of {} answered {:?}", path, text.trim());
            return Err(RemoteError::FileDeletionFailed { path });
        }

        info!("Deleted {} on card", path);
        Ok(())
    }

    /// 下载文件
    ///
    /// `expected_size` 为列表中记录的大小；与服务器报告的长度不符时立即失败。
    pub async fn download_file(
        &self,
        path: &str,
        expected_size: Option<u64>,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> RemoteResult<Download> {
        let path = device_path(path);
        let download = self
            .fetch_with_retry(Command::Download, &path, expected_size, cancel, progress)
            .await?;
        info!(
            "Downloaded {} ({} bytes in {:.1}s)",
            path,
            download.data.len(),
            download.elapsed.as_secs_f64()
        );
        Ok(download)
    }

    async fn fetch_text(
        &self,
        command: Command,
        path: &str,
        cancel: &CancellationToken,
    ) -> RemoteResult<String> {
        let download = self.fetch_with_retry(command, path, None, cancel, None).await?;
        Ok(String::from_utf8_lossy(&download.data).into_owned())
    }

    /// 只重试"无法连接"类失败，其余失败立即返回
    async fn fetch_with_retry(
        &self,
        command: Command,
        path: &str,
        expected_size: Option<u64>,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> RemoteResult<Download> {
        let url = command.url(&self.remote_root, path);
        let mut attempt = 1;

        loop {
            match self.fetch_once(&url, path, expected_size, cancel, progress).await {
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        "Request {} failed (attempt {}/{}): {}",
                        url, attempt, MAX_ATTEMPTS, e
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(RemoteError::Cancelled),
                        () = tokio::time::sleep(self.options.retry_delay) => {}
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn monitor_mode(&self) -> MonitorMode {
        if self.card_state.is_wireless_connected() {
            if let Some(ssid) = self.card_state.ssid() {
                return MonitorMode::Wireless { ssid };
            }
        }
        MonitorMode::Timer
    }

    async fn fetch_once(
        &self,
        url: &str,
        path: &str,
        expected_size: Option<u64>,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> RemoteResult<Download> {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }

        let started = Instant::now();
        let guard = self.monitor.start(self.monitor_mode());
        debug!("GET {}", url);

        let request = self.client.get(url).send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RemoteError::Cancelled),
            () = guard.lost().cancelled() => return Err(RemoteError::ConnectionLost),
            result = tokio::time::timeout(self.options.header_timeout, request) => match result {
                Err(_) => {
                    return Err(attribute(cancel, &guard, RemoteError::ConnectionUnable {
                        cause: UnableCause::Timeout(Phase::Headers),
                    }));
                }
                Ok(Err(e)) => {
                    debug!("Request to {} failed: {}", url, e);
                    return Err(attribute(cancel, &guard, classify_request_error(&e)));
                }
                Ok(Ok(response)) => response,
            },
        };

        check_status(response.status(), path)?;

        let content_length = response.content_length();
        if let Some(reported) = content_length {
            if reported > MAX_CONTENT_LENGTH {
                return Err(RemoteError::FileInvalid {
                    reason: format!("server reports {reported} bytes"),
                });
            }
        }
        if let (Some(expected), Some(reported)) = (expected_size, content_length) {
            if expected != reported {
                return Err(RemoteError::FileInvalid {
                    reason: format!("expected {expected} bytes but server reports {reported}"),
                });
            }
        }

        // 定时探测从收到响应头开始，等待响应头期间由头部超时负责
        guard.restart();

        let total = content_length.or(expected_size);
        let data = self
            .read_body(response, total, started, cancel, &guard, progress)
            .await?;

        guard.stop();
        Ok(Download {
            data,
            elapsed: started.elapsed(),
        })
    }

    async fn read_body(
        &self,
        response: reqwest::Response,
        total: Option<u64>,
        started: Instant,
        cancel: &CancellationToken,
        guard: &MonitorGuard,
        progress: Option<ProgressCallback<'_>>,
    ) -> RemoteResult<Vec<u8>> {
        let capacity = total
            .map(|t| t.min(MAX_PREALLOCATION))
            .and_then(|t| usize::try_from(t).ok())
            .unwrap_or_default();
        let mut data = Vec::with_capacity(capacity);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut schedule = ProgressSchedule::new(total.unwrap_or_default());

        let stream = response.bytes_stream().map_err(io::Error::other);
        let mut reader = std::pin::pin!(StreamReader::new(stream));

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RemoteError::Cancelled),
                () = guard.lost().cancelled() => return Err(RemoteError::ConnectionLost),
                result = tokio::time::timeout(self.options.chunk_timeout, reader.read(&mut chunk)) => result,
            };

            let n = match read {
                Err(_) => {
                    return Err(attribute(cancel, guard, RemoteError::Timeout {
                        phase: Phase::Body,
                    }));
                }
                Ok(Err(e)) => {
                    debug!("Body read failed after {} bytes: {}", data.len(), e);
                    let received = byte_count(data.len());
                    let fallback = match total {
                        Some(total) if received < total => RemoteError::FileInvalid {
                            reason: format!("connection closed after {received} of {total} bytes"),
                        },
                        _ => RemoteError::ConnectionLost,
                    };
                    return Err(attribute(cancel, guard, fallback));
                }
                Ok(Ok(n)) => n,
            };

            let received = byte_count(data.len());
            if n == 0 {
                return match total {
                    Some(total) if received != total => Err(RemoteError::FileInvalid {
                        reason: format!("received {received} of {total} bytes"),
                    }),
                    _ => Ok(data),
                };
            }

            let received = received + byte_count(n);
            if let Some(total) = total {
                if received > total {
                    return Err(RemoteError::FileInvalid {
                        reason: format!("received more than {total} bytes"),
                    });
                }
            }

            data.extend_from_slice(&chunk[..n]);
            guard.restart();

            if let (Some(callback), Some(total)) = (progress, total) {
                if let Some(is_first) = schedule.advance(received) {
                    callback(ProgressInfo {
                        current: received,
                        total,
                        elapsed: started.elapsed(),
                        is_first,
                    });
                }
            }
        }
    }
}

fn byte_count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// 按优先级确定失败的真正原因
fn attribute(cancel: &CancellationToken, guard: &MonitorGuard, fallback: RemoteError) -> RemoteError {
    if cancel.is_cancelled() {
        RemoteError::Cancelled
    } else if guard.is_lost() {
        RemoteError::ConnectionLost
    } else {
        fallback
    }
}

fn classify_request_error(e: &reqwest::Error) -> RemoteError {
    let cause = if e.is_connect() {
        UnableCause::Connect
    } else if e.is_timeout() {
        UnableCause::Timeout(Phase::Headers)
    } else {
        UnableCause::Request
    };
    RemoteError::ConnectionUnable { cause }
}

/// 设备复用状态码，这里只做分类
fn check_status(status: StatusCode, path: &str) -> RemoteResult<()> {
    if status.is_success() {
        return Ok(());
    }

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE => Err(RemoteError::ConnectionUnable {
            cause: UnableCause::Status(status.as_u16()),
        }),
        StatusCode::NOT_FOUND => Err(RemoteError::FileNotFound {
            path: path.to_string(),
        }),
        other => Err(RemoteError::Unexpected(format!("HTTP {other}"))),
    }
}

/// 设备路径统一以 `/` 开头，不带末尾 `/`（根目录为 `/`）
fn device_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str) -> RemoteResult<T> {
    text.trim()
        .parse()
        .map_err(|_| RemoteError::Unexpected(format!("invalid {what}: {:?}", text.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path() {
        assert_eq!(device_path(""), "/");
        assert_eq!(device_path("/"), "/");
        assert_eq!(device_path("DCIM"), "/DCIM");
        assert_eq!(device_path("/DCIM/100__TSB/"), "/DCIM/100__TSB");
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(StatusCode::OK, "/a").is_ok());
        for code in [400, 401, 500, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                check_status(status, "/a"),
                Err(RemoteError::ConnectionUnable {
                    cause: UnableCause::Status(code)
                })
            );
        }
        assert_eq!(
            check_status(StatusCode::NOT_FOUND, "/a"),
            Err(RemoteError::FileNotFound {
                path: "/a".to_string()
            })
        );
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN, "/a"),
            Err(RemoteError::Unexpected(_))
        ));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u32>(" 12\r\n", "count"), Ok(12));
        assert_eq!(parse_number::<i64>("-5", "timestamp"), Ok(-5));
        assert!(parse_number::<u32>("abc", "count").is_err());
    }

    struct Reachable;

    #[async_trait::async_trait]
    impl crate::wifi::NetworkStateProvider for Reachable {
        async fn wireless_ssids(&self) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn is_reachable(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_attribute_priority() {
        let cancel = CancellationToken::new();
        let fallback = RemoteError::Timeout {
            phase: Phase::Body,
        };

        let monitor = NetworkMonitor::new(Arc::new(Reachable), Duration::from_secs(60));
        let guard = monitor.start(MonitorMode::Timer);

        assert_eq!(attribute(&cancel, &guard, fallback.clone()), fallback);

        guard.lost().cancel();
        assert_eq!(
            attribute(&cancel, &guard, fallback.clone()),
            RemoteError::ConnectionLost
        );

        cancel.cancel();
        assert_eq!(
            attribute(&cancel, &guard, fallback.clone()),
            RemoteError::Cancelled
        );
    }
}
