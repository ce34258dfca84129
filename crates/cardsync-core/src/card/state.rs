//! 卡片标识与能力跟踪
//!
//! 每个检查周期从设备读取固件版本、SSID、CID，与上一周期的快照比较，
//! 判断插在设备里的物理卡是否被更换。
//!
//! 状态保存在 `tokio::sync::watch` 通道中：写入方唯一（检查循环），
//! 读取方（UI、下载引擎、网络监视器）随时读取或订阅变化，
//! 只有值真正改变时订阅者才会被通知。

use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::watch;

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)\s*$").expect("valid version regex"));

/// 固件版本号 (major.minor.build)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion(pub u32, pub u32, pub u32);

impl FirmwareVersion {
    /// 可读取 CID 的最低版本
    pub const CID: Self = Self(1, 0, 3);
    /// 可读取容量、写入时间戳、上传开关的最低版本
    pub const EXTENDED: Self = Self(2, 0, 2);

    /// 从固件版本字符串提取版本号，如 `F24A6W3AW1.00.03`
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION_PATTERN.captures(text)?;
        Some(Self(
            caps.get(1)?.as_str().parse().ok()?,
            caps.get(2)?.as_str().parse().ok()?,
            caps.get(3)?.as_str().parse().ok()?,
        ))
    }
}

/// 由固件版本决定的可用命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_get_cid: bool,
    pub can_get_capacity: bool,
    pub can_get_write_timestamp: bool,
    pub can_get_upload: bool,
}

impl Capabilities {
    pub fn for_firmware(firmware_version: &str) -> Self {
        let Some(version) = FirmwareVersion::parse(firmware_version) else {
            return Self::default();
        };
        let extended = version >= FirmwareVersion::EXTENDED;
        Self {
            can_get_cid: version >= FirmwareVersion::CID,
            can_get_capacity: extended,
            can_get_write_timestamp: extended,
            can_get_upload: extended,
        }
    }
}

/// 卡片容量（字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl Capacity {
    /// 解析 `freeSectors/totalSectors,sectorSize`
    pub fn parse(text: &str) -> Option<Self> {
        let (sectors, sector_size) = text.trim().split_once(',')?;
        let (free, total) = sectors.split_once('/')?;
        let sector_size: u64 = sector_size.trim().parse().ok()?;
        Some(Self {
            free_bytes: free.trim().parse::<u64>().ok()?.checked_mul(sector_size)?,
            total_bytes: total.trim().parse::<u64>().ok()?.checked_mul(sector_size)?,
        })
    }
}

/// 一次检查周期读取到的卡片标识
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardSnapshot {
    pub firmware_version: String,
    pub ssid: String,
    /// 固件不支持读取 CID 时为 `None`
    pub cid: Option<String>,
    /// 主机是否通过无线直接连接到设备
    pub is_wireless_connected: bool,
}

/// 新旧快照的比较结果
///
/// 每个字段为 `None` 表示没有可比较的旧值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardChanges {
    pub firmware_version: Option<bool>,
    pub ssid: Option<bool>,
    pub cid: Option<bool>,
    /// 新固件是否支持读取 CID（否则 CID 比较不可信）
    pub cid_trusted: bool,
}

impl CardChanges {
    fn between(old: Option<&CardSnapshot>, new: &CardSnapshot) -> Self {
        let Some(old) = old else {
            return Self {
                cid_trusted: Capabilities::for_firmware(&new.firmware_version).can_get_cid,
                ..Self::default()
            };
        };

        let cid = match (&old.cid, &new.cid) {
            (Some(a), Some(b)) => Some(!a.eq_ignore_ascii_case(b)),
            _ => None,
        };

        Self {
            firmware_version: Some(old.firmware_version != new.firmware_version),
            ssid: Some(old.ssid != new.ssid),
            cid,
            cid_trusted: Capabilities::for_firmware(&new.firmware_version).can_get_cid,
        }
    }

    /// 卡片是否被更换
    ///
    /// 固件版本或 SSID 变化即视为更换；两者都未变时，只有固件支持
    /// 读取 CID 才参考 CID 比较结果。无法判断时返回 `None`。
    pub fn is_changed(&self) -> Option<bool> {
        match (self.firmware_version, self.ssid) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => {
                if self.cid_trusted {
                    self.cid
                } else {
                    Some(false)
                }
            }
            _ => None,
        }
    }
}

/// 卡片完整状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardInfo {
    pub snapshot: Option<CardSnapshot>,
    pub capacity: Option<Capacity>,
    pub write_timestamp: Option<i64>,
    pub upload_enabled: Option<bool>,
}

impl CardInfo {
    pub fn capabilities(&self) -> Capabilities {
        self.snapshot
            .as_ref()
            .map(|s| Capabilities::for_firmware(&s.firmware_version))
            .unwrap_or_default()
    }
}

/// 卡片状态跟踪器
#[derive(Debug)]
pub struct CardState {
    tx: watch::Sender<CardInfo>,
}

impl Default for CardState {
    fn default() -> Self {
        Self::new()
    }
}

impl CardState {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(CardInfo::default()),
        }
    }

    /// 写入新的快照，返回与旧快照的差异
    pub fn update(&self, snapshot: CardSnapshot) -> CardChanges {
        let mut changes = CardChanges::default();
        self.tx.send_if_modified(|info| {
            changes = CardChanges::between(info.snapshot.as_ref(), &snapshot);
            if info.snapshot.as_ref() == Some(&snapshot) {
                return false;
            }
            info.snapshot = Some(snapshot);
            true
        });
        changes
    }

    /// 更新容量，返回是否变化
    pub fn set_capacity(&self, capacity: Option<Capacity>) -> bool {
        self.tx.send_if_modified(|info| {
            if info.capacity == capacity {
                return false;
            }
            info.capacity = capacity;
            true
        })
    }

    /// 更新写入时间戳
    ///
    /// 返回 `Some(true)` 表示卡片自上次读取后有写入，首次读取返回 `None`。
    pub fn set_write_timestamp(&self, timestamp: i64) -> Option<bool> {
        let mut written = None;
        self.tx.send_if_modified(|info| {
            written = info.write_timestamp.map(|old| old != timestamp);
            if info.write_timestamp == Some(timestamp) {
                return false;
            }
            info.write_timestamp = Some(timestamp);
            true
        });
        written
    }

    /// 更新上传开关，返回是否变化
    pub fn set_upload_enabled(&self, enabled: bool) -> bool {
        self.tx.send_if_modified(|info| {
            if info.upload_enabled == Some(enabled) {
                return false;
            }
            info.upload_enabled = Some(enabled);
            true
        })
    }

    /// 当前状态的副本
    pub fn info(&self) -> CardInfo {
        self.tx.borrow().clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.tx.borrow().capabilities()
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.tx
            .borrow()
            .snapshot
            .as_ref()
            .map(|s| s.firmware_version.clone())
    }

    pub fn ssid(&self) -> Option<String> {
        self.tx.borrow().snapshot.as_ref().map(|s| s.ssid.clone())
    }

    pub fn cid(&self) -> Option<String> {
        self.tx
            .borrow()
            .snapshot
            .as_ref()
            .and_then(|s| s.cid.clone())
    }

    pub fn is_wireless_connected(&self) -> bool {
        self.tx
            .borrow()
            .snapshot
            .as_ref()
            .is_some_and(|s| s.is_wireless_connected)
    }

    pub fn upload_enabled(&self) -> Option<bool> {
        self.tx.borrow().upload_enabled
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<CardInfo> {
        self.tx.subscribe()
    }
}
