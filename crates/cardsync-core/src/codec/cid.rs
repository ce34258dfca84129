//! CID (Card Identification) 寄存器解码
//!
//! 设备以 32 个十六进制字符返回 128 位 CID。字节布局（高位在前）:
//!
//! | 字节 | 字段 |
//! |---|---|
//! | 0 | 厂商 ID |
//! | 1-2 | OEM ID (ASCII) |
//! | 3-7 | 产品名 (ASCII) |
//! | 8 | 产品版本 (BCD n.m) |
//! | 9-12 | 序列号 |
//! | 13-14 | 4 位保留 + 8 位年份(+2000) + 4 位月份 |
//! | 15 | CRC7 + 1 |
//!
//! 解码是尽力而为的补充信息，格式不对时返回 `None`，不影响同步流程。

use chrono::{Datelike, NaiveDate};

/// CID 解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidInfo {
    pub manufacturer_id: u8,
    pub oem_id: String,
    pub product_name: String,
    pub product_revision: String,
    pub serial_number: u32,
    /// 制造年月（日固定为 1 日），字段无效时为 `None`
    pub manufacturing_date: Option<NaiveDate>,
}

impl CidInfo {
    /// 从十六进制字符串解码
    pub fn parse(cid: &str) -> Option<Self> {
        let bytes = hex_to_bytes(cid.trim())?;
        Self::from_bytes(&bytes)
    }

    /// 从 16 字节原始数据解码
    pub fn from_bytes(bytes: &[u8; 16]) -> Option<Self> {
        let oem_id = ascii_field(&bytes[1..3])?;
        let product_name = ascii_field(&bytes[3..8])?;

        let revision = bytes[8];
        let product_revision = format!("{}.{}", revision >> 4, revision & 0x0F);

        let serial_number = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);

        let year = u32::from(bytes[13] & 0x0F) << 4 | u32::from(bytes[14] >> 4);
        let month = u32::from(bytes[14] & 0x0F);

        Some(Self {
            manufacturer_id: bytes[0],
            oem_id,
            product_name,
            product_revision,
            serial_number,
            manufacturing_date: manufacturing_date(year, month),
        })
    }

    /// 制造年月的显示文本（如 `2012-07`）
    pub fn manufacturing_month(&self) -> Option<String> {
        self.manufacturing_date
            .map(|d| format!("{:04}-{:02}", d.year(), d.month()))
    }
}

fn manufacturing_date(year_offset: u32, month: u32) -> Option<NaiveDate> {
    if year_offset > 1000 || month > 12 {
        return None;
    }
    let year = i32::try_from(2000 + year_offset).ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn ascii_field(raw: &[u8]) -> Option<String> {
    if !raw.iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
        return None;
    }
    // 上面已检查为可打印 ASCII
    Some(raw.iter().map(|&b| b as char).collect())
}

fn hex_to_bytes(text: &str) -> Option<[u8; 16]> {
    if text.len() != 32 || !text.is_ascii() {
        return None;
    }

    let mut bytes = [0u8; 16];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(bytes)
}
