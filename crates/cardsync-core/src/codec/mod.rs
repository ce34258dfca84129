//! 设备数据格式编解码
//!
//! - **fat_datetime**: FAT 打包日期/时间
//! - **cid**: SD 卡 CID 寄存器
//! - **signature**: 远程文件内容签名

pub mod cid;
pub mod fat_datetime;
pub mod signature;

pub use cid::CidInfo;
pub use signature::Signature;
