//! 应用配置和持久化
//!
//! 设置以 TOML 保存在 `<config_dir>/cardsync/settings.toml`。
//! 文件缺失或无法解析时使用默认值。

use anyhow::Context;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::card::{RemoteFileEntry, SortOrder};
use crate::transfer::EngineOptions;

/// 默认设备地址
pub const DEFAULT_REMOTE_ROOT: &str = "http://flashair/";

/// 同步哪些文件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncFilter {
    #[default]
    All,
    /// 所有图片（含 RAW）
    Images,
    /// 可以直接解码显示的图片
    LoadableImages,
}

impl SyncFilter {
    pub fn accepts(&self, entry: &RemoteFileEntry) -> bool {
        match self {
            SyncFilter::All => true,
            SyncFilter::Images => entry.is_image(),
            SyncFilter::LoadableImages => entry.is_image() && entry.is_loadable(),
        }
    }
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备根 URL
    pub remote_root: String,
    /// 本地保存目录
    pub local_folder: PathBuf,
    /// 是否从最新的文件开始
    pub order_from_newest: bool,
    pub sync_filter: SyncFilter,
    /// 按拍摄日期建立子目录 (YYYYMMDD)
    pub make_dated_folder: bool,
    /// 保存成功后删除设备上的文件
    pub delete_on_copy: bool,
    /// 同步检查间隔（秒）
    pub check_interval_secs: u64,
    pub header_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
    /// 定时模式下的可达性探测间隔（秒）
    pub monitor_interval_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            remote_root: DEFAULT_REMOTE_ROOT.to_string(),
            local_folder: dirs::picture_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cardsync"),
            order_from_newest: false,
            sync_filter: SyncFilter::All,
            make_dated_folder: false,
            delete_on_copy: false,
            check_interval_secs: 30,
            header_timeout_secs: 10,
            chunk_timeout_secs: 10,
            monitor_interval_secs: 2,
        }
    }
}

impl AppSettings {
    /// 默认配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cardsync")
            .join("settings.toml")
    }

    /// 从默认位置加载
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定文件加载（如果文件不存在或无法解析则使用默认值）
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let settings = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|content| Self::from_toml(&content));

        match settings {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }

    fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut settings: Self = toml::from_str(content).context("failed to parse settings")?;
        settings.normalize();
        Ok(settings)
    }

    /// 保存到默认位置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 修正不合法的值
    pub fn normalize(&mut self) {
        if !self.remote_root.ends_with('/') {
            self.remote_root.push('/');
        }
        self.check_interval_secs = self.check_interval_secs.max(1);
        self.header_timeout_secs = self.header_timeout_secs.max(1);
        self.chunk_timeout_secs = self.chunk_timeout_secs.max(1);
        self.monitor_interval_secs = self.monitor_interval_secs.max(1);
    }

    pub fn sort_order(&self) -> SortOrder {
        if self.order_from_newest {
            SortOrder::NewestFirst
        } else {
            SortOrder::OldestFirst
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            header_timeout: Duration::from_secs(self.header_timeout_secs),
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
            ..EngineOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.remote_root, DEFAULT_REMOTE_ROOT);
        assert_eq!(settings.sync_filter, SyncFilter::All);
        assert_eq!(settings.sort_order(), SortOrder::OldestFirst);
        assert!(settings.local_folder.ends_with("cardsync"));

        let options = settings.engine_options();
        assert_eq!(options.header_timeout, Duration::from_secs(10));
        assert_eq!(options.retry_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings = AppSettings::from_toml(
            r#"
            remote_root = "http://192.168.0.1"
            order_from_newest = true
            sync_filter = "loadable_images"
            check_interval_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(settings.remote_root, "http://192.168.0.1/");
        assert_eq!(settings.sort_order(), SortOrder::NewestFirst);
        assert_eq!(settings.sync_filter, SyncFilter::LoadableImages);
        assert_eq!(settings.check_interval_secs, 1);
        assert_eq!(settings.chunk_timeout_secs, 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let settings = AppSettings {
            local_folder: dir.path().join("photos"),
            make_dated_folder: true,
            delete_on_copy: true,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "remote_root = [").unwrap();

        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
        assert_eq!(
            AppSettings::load_from(&dir.path().join("missing.toml")),
            AppSettings::default()
        );
    }

    #[test]
    fn test_sync_filter() {
        let jpeg = RemoteFileEntry::parse("/DCIM/100__TSB,A.JPG,100,32,17441,18650", None);
        let raw = RemoteFileEntry::parse("/DCIM/100__TSB,A.NEF,100,32,17441,18650", None);
        let video = RemoteFileEntry::parse("/DCIM/100__TSB,A.MOV,100,32,17441,18650", None);

        assert!(SyncFilter::All.accepts(&video));
        assert!(SyncFilter::Images.accepts(&raw));
        assert!(!SyncFilter::Images.accepts(&video));
        assert!(SyncFilter::LoadableImages.accepts(&jpeg));
        assert!(!SyncFilter::LoadableImages.accepts(&raw));
    }
}
