//! 主机与设备之间的网络链路
//!
//! - **monitor**: 传输期间的链路断开监视
//! - **nm_dbus**: NetworkManager D-Bus 接口（无线连接状态推送）
//! - **probe**: TCP 可达性探测

pub mod monitor;
pub mod nm_dbus;
pub mod probe;

pub use monitor::{
    MonitorGuard, MonitorMode, NetworkMonitor, NetworkStateProvider, SystemNetworkProvider,
};
pub use nm_dbus::NmClient;
pub use probe::TcpProbe;
