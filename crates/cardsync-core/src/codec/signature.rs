//! 远程文件内容签名
//!
//! 由 (大小, 小写路径, 修改时间) 计算的固定长度哈希，用来在多次列表之间
//! 识别"同一个"文件，属性位的变化（如归档位被清除）不影响签名。

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::fmt;

/// 签名长度（字节）
pub const SIGNATURE_LEN: usize = 32;

/// 远程文件签名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// 计算签名
    ///
    /// 路径按 ASCII 小写处理，设备文件系统不区分大小写。
    pub fn compute(size: u64, path: &str, date: Option<&NaiveDateTime>) -> Self {
        let ticks = date.map_or(0, |d| d.and_utc().timestamp());

        let mut hasher = Sha256::new();
        hasher.update(size.to_le_bytes());
        hasher.update(path.to_ascii_lowercase().as_bytes());
        hasher.update(ticks.to_le_bytes());
        Self(hasher.finalize().into())
    }

}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
