//! 设备可达性探测
//!
//! 非无线直连（USB/有线网桥等）时没有平台事件可用，只能定时尝试
//! 与设备建立 TCP 连接来判断链路是否仍然存在。

use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;

/// 默认探测超时
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// TCP 连接探测
#[derive(Debug, Clone)]
pub struct TcpProbe {
    /// `host:port`
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// 从设备根 URL 构造，如 `http://flashair/` -> `flashair:80`
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = reqwest::Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        let port = parsed.port_or_known_default()?;
        Some(Self::new(format!("{host}:{port}")))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 尝试建立一次 TCP 连接
    pub async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", self.address, e);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", self.address);
                false
            }
        }
    }
}
