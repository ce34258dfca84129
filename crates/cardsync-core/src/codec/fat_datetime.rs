//! FAT 打包日期/时间编解码
//!
//! 设备的文件列表用两个 16 位整数描述修改时间:
//!
//! ```text
//! date: YYYYYYYM MMMDDDDD   年 = 1980 + Y (0..=127), 月 1..=12, 日 1..=31
//! time: HHHHHMMM MMMSSSSS   时 0..=23, 分 0..=59, 秒 = 2 * S
//! ```
//!
//! 秒只有 2 秒精度，奇数秒编码后会丢失 1 秒，这是格式本身的限制。

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

const BASE_YEAR: i32 = 1980;
const MAX_YEAR: i32 = BASE_YEAR + 0x7F;

/// 解码打包的日期和时间
///
/// 字段越界（例如 13 月、2 月 30 日、25 点）时返回 `None`，不会 panic。
pub fn decode(date: u16, time: u16) -> Option<NaiveDateTime> {
    let year = BASE_YEAR + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0F);
    let day = u32::from(date & 0x1F);

    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3F);
    let second = u32::from(time & 0x1F) * 2;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// 从设备返回的原始整数解码
///
/// 列表中日期/时间按 32 位整数解析，超出 16 位的值视为无效。
pub fn decode_raw(date: i32, time: i32) -> Option<NaiveDateTime> {
    let date = u16::try_from(date).ok()?;
    let time = u16::try_from(time).ok()?;
    decode(date, time)
}

/// 编码为打包的日期和时间
///
/// 年份不在 1980..=2107 时返回 `None`。奇数秒向下取整到偶数秒。
pub fn encode(value: &NaiveDateTime) -> Option<(u16, u16)> {
    let year = value.year();
    if !(BASE_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }

    // 各字段均已由 chrono 保证在合法范围内
    let date = ((year - BASE_YEAR) as u16) << 9 | (value.month() as u16) << 5 | value.day() as u16;
    let time = (value.hour() as u16) << 11
        | (value.minute() as u16) << 5
        | (value.second() / 2) as u16;

    Some((date, time))
}
