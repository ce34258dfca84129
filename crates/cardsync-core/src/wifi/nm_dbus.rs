//! NetworkManager D-Bus 客户端
//!
//! 通过 D-Bus 直接与 NetworkManager 守护进程通信，查询主机当前关联的
//! 无线网络，并订阅连接变化以便在设备热点断开时立即得到通知。
//!
//! # 使用
//!
//! ```ignore
//! use cardsync_core::wifi::nm_dbus::NmClient;
//!
//! let client = NmClient::new().await?;
//!
//! // 当前关联的 SSID
//! let ssids = client.connected_ssids().await?;
//!
//! // 等待指定网络断开
//! client.wait_for_ssid_loss("flashair_xxxx").await?;
//! ```

use anyhow::{Context, Result};
use futures_util::StreamExt;
use log::{debug, info};
use zbus::Connection;
use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

/// NetworkManager 主接口代理
#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
trait NetworkManager {
    /// 获取所有网络设备
    fn get_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    /// NetworkManager 版本
    #[zbus(property)]
    fn version(&self) -> zbus::Result<String>;

    /// 活动连接列表
    #[zbus(property)]
    fn active_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

/// NetworkManager.Device 接口代理
#[proxy(
    interface = "org.freedesktop.NetworkManager.Device",
    default_service = "org.freedesktop.NetworkManager"
)]
trait NmDevice {
    /// 设备接口名 (如 wlan0)
    #[zbus(property)]
    fn interface(&self) -> zbus::Result<String>;

    /// 设备类型 (2=WiFi)
    #[zbus(property)]
    fn device_type(&self) -> zbus::Result<u32>;

    /// 设备状态
    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;
}

/// NetworkManager.Device.Wireless 接口代理
#[proxy(
    interface = "org.freedesktop.NetworkManager.Device.Wireless",
    default_service = "org.freedesktop.NetworkManager"
)]
trait NmDeviceWireless {
    /// 当前关联的接入点，未关联时为 "/"
    #[zbus(property)]
    fn active_access_point(&self) -> zbus::Result<OwnedObjectPath>;
}

/// NetworkManager.AccessPoint 接口代理
#[proxy(
    interface = "org.freedesktop.NetworkManager.AccessPoint",
    default_service = "org.freedesktop.NetworkManager"
)]
trait NmAccessPoint {
    /// SSID 原始字节
    #[zbus(property)]
    fn ssid(&self) -> zbus::Result<Vec<u8>>;
}

/// 设备类型常量
pub mod device_type {
    pub const WIFI: u32 = 2;
}

/// 设备状态常量
pub mod device_state {
    pub const ACTIVATED: u32 = 100;
}

/// WiFi 设备信息
#[derive(Debug, Clone)]
pub struct WifiDevice {
    /// D-Bus 对象路径
    pub path: OwnedObjectPath,
    /// 接口名 (如 wlan0)
    pub interface: String,
    /// 是否已激活
    pub is_active: bool,
}

/// NetworkManager D-Bus 客户端
#[derive(Clone)]
pub struct NmClient {
    connection: Connection,
}

impl NmClient {
    /// 创建新的 NM D-Bus 客户端
    pub async fn new() -> Result<Self> {
        let connection = Connection::system()
            .await
            .context("Failed to connect to system D-Bus")?;

        // 验证 NetworkManager 是否可用
        let nm = NetworkManagerProxy::new(&connection).await?;
        let version = nm.version().await?;
        info!("Connected to NetworkManager {}", version);

        Ok(Self { connection })
    }

    /// 获取所有 WiFi 设备
    pub async fn get_wifi_devices(&self) -> Result<Vec<WifiDevice>> {
        let nm = NetworkManagerProxy::new(&self.connection).await?;
        let device_paths = nm.get_devices().await?;

        let mut wifi_devices = Vec::new();

        for path in device_paths {
            let device = NmDeviceProxy::builder(&self.connection)
                .path(&path)?
                .build()
                .await?;

            if device.device_type().await.unwrap_or(0) != device_type::WIFI {
                continue;
            }

            let interface = device.interface().await.unwrap_or_default();
            let state = device.state().await.unwrap_or(0);

            wifi_devices.push(WifiDevice {
                path,
                interface,
                is_active: state == device_state::ACTIVATED,
            });
        }

        Ok(wifi_devices)
    }

    /// 获取当前关联的所有无线网络 SSID
    pub async fn connected_ssids(&self) -> Result<Vec<String>> {
        let mut ssids = Vec::new();

        for device in self.get_wifi_devices().await? {
            if !device.is_active {
                continue;
            }

            let wireless = NmDeviceWirelessProxy::builder(&self.connection)
                .path(&device.path)?
                .build()
                .await?;

            let Ok(ap_path) = wireless.active_access_point().await else {
                continue;
            };
            if ap_path.as_str() == "/" {
                continue;
            }

            let ap = NmAccessPointProxy::builder(&self.connection)
                .path(&ap_path)?
                .build()
                .await?;

            if let Ok(raw) = ap.ssid().await {
                let ssid = String::from_utf8_lossy(&raw).into_owned();
                debug!("{} associated with '{}'", device.interface, ssid);
                ssids.push(ssid);
            }
        }

        Ok(ssids)
    }

    /// 等待指定 SSID 不再处于关联状态
    ///
    /// 订阅 `ActiveConnections` 属性变化，每次变化后重新检查关联的网络；
    /// 与该 SSID 无关的连接变化（例如另一块网卡断开）会被忽略。
    pub async fn wait_for_ssid_loss(&self, ssid: &str) -> Result<()> {
        let nm = NetworkManagerProxy::new(&self.connection).await?;
        let mut changes = nm.receive_active_connections_changed().await;

        // 订阅建立之前可能已经断开
        if !self.connected_ssids().await?.iter().any(|s| s == ssid) {
            return Ok(());
        }

        while changes.next().await.is_some() {
            let ssids = self.connected_ssids().await?;
            if ssids.iter().any(|s| s == ssid) {
                debug!("Active connections changed, '{}' still associated", ssid);
                continue;
            }
            info!("Wireless network '{}' disconnected", ssid);
            return Ok(());
        }

        Err(anyhow::anyhow!("NetworkManager property stream closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 注意: 这些测试需要系统 D-Bus 和 NetworkManager 运行
    // 在 CI 环境中可能需要跳过

    #[tokio::test]
    #[ignore = "requires system D-Bus and NetworkManager"]
    async fn test_wifi_devices() {
        let client = NmClient::new().await.unwrap();
        for device in client.get_wifi_devices().await.unwrap() {
            assert!(!device.interface.is_empty());
            println!("{} active={}", device.interface, device.is_active);
        }
    }

    #[tokio::test]
    #[ignore = "requires system D-Bus and NetworkManager"]
    async fn test_connected_ssids() {
        let client = NmClient::new().await.unwrap();
        for ssid in client.connected_ssids().await.unwrap() {
            println!("Associated: {}", ssid);
        }
    }
}
