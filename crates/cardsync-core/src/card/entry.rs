//! 远程文件条目
//!
//! 解析设备文件列表 (`command.cgi?op=100`) 的单行:
//!
//! ```text
//! <directory>,<filename>,<size>,<attribute>,<date>,<time>
//! /DCIM/100__TSB,DSC_0001.JPG,2097152,32,17441,18650
//! ```
//!
//! 文件名本身可能包含逗号，因此只有最后 4 个字段是固定的。

use chrono::NaiveDateTime;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::codec::{Signature, fat_datetime};

/// 字段分隔符
const SEPARATOR: char = ',';

/// 路径中不允许出现的字符（`?` 表示设备返回了无法解码的字节）
const INVALID_PATH_CHARS: &[char] = &['"', '<', '>', '|', '?', '*'];

/// 文件名中不允许出现的字符
const INVALID_FILE_NAME_CHARS: &[char] = &['"', '<', '>', '|', ':', '*', '?', '\\', '/'];

/// 设备自用的配置目录（位于根目录）
const DEVICE_CONFIG_FOLDER: &str = "SD_WLAN";

/// 设备在 DCIM 下创建的系统目录及其中的占位图片
const DEVICE_SYSTEM_FOLDER: &str = "100__TSB";
const DEVICE_SYSTEM_IMAGE: &str = "FA000001.JPG";

/// 条目解析失败原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryParseError {
    #[error("empty line")]
    Empty,

    #[error("line does not start with directory {0:?}")]
    DirectoryMismatch(String),

    #[error("invalid directory {0:?}")]
    InvalidDirectory(String),

    #[error("missing field separator")]
    MissingSeparator,

    #[error("expected at least 5 fields, found {0}")]
    TooFewFields(usize),

    #[error("invalid file name {0:?}")]
    InvalidFileName(String),

    #[error("invalid {field} value {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

/// 排序方向（按日期）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// 旧文件在前
    #[default]
    OldestFirst,
    /// 新文件在前
    NewestFirst,
}

/// 文件属性位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes {
    pub read_only: bool,
    pub hidden: bool,
    pub system: bool,
    pub volume: bool,
    pub directory: bool,
    pub archive: bool,
}

impl FileAttributes {
    pub fn from_bits(bits: i32) -> Self {
        Self {
            read_only: bits & 0x01 != 0,
            hidden: bits & 0x02 != 0,
            system: bits & 0x04 != 0,
            volume: bits & 0x08 != 0,
            directory: bits & 0x10 != 0,
            archive: bits & 0x20 != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        u8::from(self.read_only)
            | u8::from(self.hidden) << 1
            | u8::from(self.system) << 2
            | u8::from(self.volume) << 3
            | u8::from(self.directory) << 4
            | u8::from(self.archive) << 5
    }
}

/// 按扩展名划分的文件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    Jpeg,
    Png,
    Bmp,
    Gif,
    Tiff,
    /// 相机 RAW，通用解码器无法直接加载
    Raw,
    Video,
    #[default]
    Other,
}

impl FileKind {
    /// 根据小写扩展名（不含点）分类
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jpg" | "jpeg" => FileKind::Jpeg,
            "png" => FileKind::Png,
            "bmp" => FileKind::Bmp,
            "gif" => FileKind::Gif,
            "tif" | "tiff" => FileKind::Tiff,
            "arw" | "cr2" | "cr3" | "dng" | "nef" | "nrw" | "orf" | "pef" | "raf" | "rw2"
            | "srw" => FileKind::Raw,
            "avi" | "mov" | "mp4" | "m4v" | "mts" | "m2ts" | "3gp" | "wmv" => FileKind::Video,
            _ => FileKind::Other,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            FileKind::Jpeg
                | FileKind::Png
                | FileKind::Bmp
                | FileKind::Gif
                | FileKind::Tiff
                | FileKind::Raw
        )
    }

    pub fn is_video(&self) -> bool {
        matches!(self, FileKind::Video)
    }

    /// 是否可由常见图像解码器直接加载
    pub fn is_loadable(&self) -> bool {
        matches!(
            self,
            FileKind::Jpeg | FileKind::Png | FileKind::Bmp | FileKind::Gif | FileKind::Tiff
        )
    }
}

/// 设备文件列表中的一个条目
///
/// 由一行列表文本构造，之后不可变。`is_imported()` 为 `false` 时其余字段
/// 只包含解析失败前已填充的部分，调用方必须先检查。
#[derive(Debug, Clone, Default)]
pub struct RemoteFileEntry {
    directory: String,
    file_name: String,
    file_extension: String,
    size: u64,
    attributes: FileAttributes,
    date: Option<NaiveDateTime>,
    kind: FileKind,
    is_imported: bool,
    signature: Option<Signature>,
}

impl RemoteFileEntry {
    /// 解析一行列表文本
    ///
    /// `directory` 为请求列表时使用的目录；提供时行首必须是该目录（不区分大小写）。
    pub fn parse(line: &str, directory: Option<&str>) -> Self {
        let mut entry = Self::default();
        match entry.import(line, directory) {
            Ok(()) => entry.is_imported = true,
            Err(e) => debug!("Skipped file list line {:?}: {}", line, e),
        }
        entry
    }

    /// 解析一行列表文本，失败时返回原因
    pub fn try_parse(line: &str, directory: Option<&str>) -> Result<Self, EntryParseError> {
        let mut entry = Self::default();
        entry.import(line, directory)?;
        entry.is_imported = true;
        Ok(entry)
    }

    fn import(&mut self, line: &str, directory: Option<&str>) -> Result<(), EntryParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(EntryParseError::Empty);
        }

        let rest = match directory {
            Some(dir) => {
                let dir = normalize_directory(dir);
                let matches = line
                    .get(..dir.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(dir));
                if !matches {
                    return Err(EntryParseError::DirectoryMismatch(dir.to_string()));
                }
                self.directory = line[..dir.len()].to_string();
                &line[dir.len()..]
            }
            None => {
                let idx = line.find(SEPARATOR).ok_or(EntryParseError::MissingSeparator)?;
                self.directory = line[..idx].to_string();
                &line[idx..]
            }
        };

        if !is_valid_directory(&self.directory) {
            return Err(EntryParseError::InvalidDirectory(self.directory.clone()));
        }

        let rest = rest
            .strip_prefix(SEPARATOR)
            .ok_or(EntryParseError::MissingSeparator)?;

        let fields: Vec<&str> = rest.split(SEPARATOR).collect();
        if fields.len() < 5 {
            return Err(EntryParseError::TooFewFields(fields.len()));
        }

        // 多出的字段属于文件名
        let split = fields.len() - 4;
        let file_name = fields[..split].join(",");
        if !is_valid_file_name(&file_name) {
            return Err(EntryParseError::InvalidFileName(file_name));
        }
        self.file_extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        self.file_name = file_name;

        // 超过 i32 的大小视为无法解析，不截断
        let size = parse_i32("size", fields[split])?;
        self.size = u64::try_from(size).map_err(|_| EntryParseError::InvalidNumber {
            field: "size",
            value: fields[split].to_string(),
        })?;

        self.attributes = FileAttributes::from_bits(parse_i32("attribute", fields[split + 1])?);

        let date = parse_i32("date", fields[split + 2])?;
        let time = parse_i32("time", fields[split + 3])?;
        self.date = fat_datetime::decode_raw(date, time);

        if !self.attributes.directory && !self.attributes.volume {
            self.kind = FileKind::from_extension(&self.file_extension);
            if self.kind.is_image() {
                self.signature = Some(Signature::compute(
                    self.size,
                    &self.file_path(),
                    self.date.as_ref(),
                ));
            }
        }

        Ok(())
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 小写扩展名（不含点）
    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    /// 设备上的绝对路径
    pub fn file_path(&self) -> String {
        format!("{}/{}", self.directory, self.file_name)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.directory
    }

    /// 修改时间；设备返回无效日期时为 `None`
    pub fn date(&self) -> Option<NaiveDateTime> {
        self.date
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_image(&self) -> bool {
        self.kind.is_image()
    }

    pub fn is_video(&self) -> bool {
        self.kind.is_video()
    }

    pub fn is_loadable(&self) -> bool {
        self.kind.is_loadable()
    }

    /// 设备只为 JPEG 生成缩略图
    pub fn can_get_thumbnail(&self) -> bool {
        self.kind == FileKind::Jpeg
    }

    pub fn is_imported(&self) -> bool {
        self.is_imported
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// 是否为设备自身的配置/系统文件，不参与同步
    pub fn is_housekeeping(&self) -> bool {
        let top = self
            .directory
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();

        if top.eq_ignore_ascii_case(DEVICE_CONFIG_FOLDER)
            || (self.directory.is_empty() && self.file_name.eq_ignore_ascii_case(DEVICE_CONFIG_FOLDER))
        {
            return true;
        }

        let parent = self.directory.rsplit('/').next().unwrap_or_default();
        parent.eq_ignore_ascii_case(DEVICE_SYSTEM_FOLDER)
            && self.file_name.eq_ignore_ascii_case(DEVICE_SYSTEM_IMAGE)
    }

    /// 按指定方向比较: 日期、路径（序数比较）、大小
    pub fn compare(&self, other: &Self, order: SortOrder) -> Ordering {
        let by_date = match order {
            SortOrder::OldestFirst => self.date.cmp(&other.date),
            SortOrder::NewestFirst => other.date.cmp(&self.date),
        };
        by_date
            .then_with(|| self.file_path().cmp(&other.file_path()))
            .then_with(|| self.size.cmp(&other.size))
    }
}

impl PartialEq for RemoteFileEntry {
    /// 有签名时比较签名，否则比较 (日期, 路径, 大小)
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (&self.signature, &other.signature) {
            return a == b;
        }
        self.compare(other, SortOrder::OldestFirst) == Ordering::Equal
    }
}

/// 稳定排序
pub fn sort_entries(entries: &mut [RemoteFileEntry], order: SortOrder) {
    entries.sort_by(|a, b| a.compare(b, order));
}

/// 规范化目录: 去掉末尾 `/`，根目录为空串
pub fn normalize_directory(dir: &str) -> &str {
    dir.trim_end_matches('/')
}

fn is_valid_directory(dir: &str) -> bool {
    dir.is_ascii()
        && !dir
            .chars()
            .any(|c| c.is_ascii_control() || INVALID_PATH_CHARS.contains(&c))
}

fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.is_ascii()
        && !name
            .chars()
            .any(|c| c.is_ascii_control() || INVALID_FILE_NAME_CHARS.contains(&c))
}

fn parse_i32(field: &'static str, value: &str) -> Result<i32, EntryParseError> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| EntryParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}
