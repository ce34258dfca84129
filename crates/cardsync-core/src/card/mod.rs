//! 设备上的文件与卡片状态

pub mod entry;
pub mod state;

pub use entry::{
    EntryParseError, FileAttributes, FileKind, RemoteFileEntry, SortOrder, sort_entries,
};
pub use state::{
    Capabilities, Capacity, CardChanges, CardInfo, CardSnapshot, CardState, FirmwareVersion,
};
