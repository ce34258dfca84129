//! 设备 CGI 命令
//!
//! 所有命令都是附加在设备根 URL 之后的路径后缀。

/// 设备命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 列出目录 (op=100)
    FileList,
    /// 目录中的文件数 (op=101)
    FileCount,
    /// 缩略图
    Thumbnail,
    /// 固件版本 (op=108)
    FirmwareVersion,
    /// CID (op=120)
    Cid,
    /// SSID (op=104)
    Ssid,
    /// 剩余/总容量 (op=140)
    Capacity,
    /// 更新状态 (op=102)
    UpdateStatus,
    /// 最后写入事件时间戳 (op=121)
    WriteTimeStamp,
    /// 上传开关 (op=118)
    Upload,
    /// 删除文件
    Delete,
    /// 直接下载文件
    Download,
}

impl Command {
    /// 路径模板前缀，路径参数紧随其后
    pub fn template(self) -> &'static str {
        match self {
            Command::FileList => "command.cgi?op=100&DIR=",
            Command::FileCount => "command.cgi?op=101&DIR=",
            Command::Thumbnail => "thumbnail.cgi?",
            Command::FirmwareVersion => "command.cgi?op=108",
            Command::Cid => "command.cgi?op=120",
            Command::Ssid => "command.cgi?op=104",
            Command::Capacity => "command.cgi?op=140",
            Command::UpdateStatus => "command.cgi?op=102",
            Command::WriteTimeStamp => "command.cgi?op=121",
            Command::Upload => "command.cgi?op=118",
            Command::Delete => "upload.cgi?DEL=",
            Command::Download => "",
        }
    }

    /// 是否需要路径参数
    pub fn takes_path(self) -> bool {
        matches!(
            self,
            Command::FileList
                | Command::FileCount
                | Command::Thumbnail
                | Command::Delete
                | Command::Download
        )
    }

    /// 组合完整 URL: `remote_root + template + remainder`
    ///
    /// `remote_root` 必须以 `/` 结尾；路径统一以单个 `/` 开头。
    pub fn url(self, remote_root: &str, path: &str) -> String {
        if !self.takes_path() {
            return format!("{}{}", remote_root, self.template());
        }

        let remainder = path.trim_start_matches('/');
        match self {
            // 直接下载时根 URL 已经提供了 `/`
            Command::Download => format!("{remote_root}{remainder}"),
            _ => format!("{}{}/{}", remote_root, self.template(), remainder),
        }
    }
}

/// 保证根 URL 以 `/` 结尾
pub fn normalize_root(remote_root: &str) -> String {
    if remote_root.ends_with('/') {
        remote_root.to_string()
    } else {
        format!("{remote_root}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "http://flashair/";

    #[test]
    fn test_path_commands() {
        assert_eq!(
            Command::FileList.url(ROOT, "/DCIM/100__TSB"),
            "http://flashair/command.cgi?op=100&DIR=/DCIM/100__TSB"
        );
        assert_eq!(
            Command::FileList.url(ROOT, ""),
            "http://flashair/command.cgi?op=100&DIR=/"
        );
        assert_eq!(
            Command::FileCount.url(ROOT, "DCIM"),
            "http://flashair/command.cgi?op=101&DIR=/DCIM"
        );
        assert_eq!(
            Command::Thumbnail.url(ROOT, "/DCIM/A.JPG"),
            "http://flashair/thumbnail.cgi?/DCIM/A.JPG"
        );
        assert_eq!(
            Command::Delete.url(ROOT, "/DCIM/A.JPG"),
            "http://flashair/upload.cgi?DEL=/DCIM/A.JPG"
        );
        assert_eq!(
            Command::Download.url(ROOT, "/DCIM/A.JPG"),
            "http://flashair/DCIM/A.JPG"
        );
    }

    #[test]
    fn test_plain_commands() {
        assert_eq!(
            Command::FirmwareVersion.url(ROOT, "ignored"),
            "http://flashair/command.cgi?op=108"
        );
        assert_eq!(Command::Cid.url(ROOT, ""), "http://flashair/command.cgi?op=120");
        assert_eq!(Command::Ssid.url(ROOT, ""), "http://flashair/command.cgi?op=104");
        assert_eq!(Command::Capacity.url(ROOT, ""), "http://flashair/command.cgi?op=140");
        assert_eq!(
            Command::UpdateStatus.url(ROOT, ""),
            "http://flashair/command.cgi?op=102"
        );
        assert_eq!(
            Command::WriteTimeStamp.url(ROOT, ""),
            "http://flashair/command.cgi?op=121"
        );
        assert_eq!(Command::Upload.url(ROOT, ""), "http://flashair/command.cgi?op=118");
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root("http://flashair"), ROOT);
        assert_eq!(normalize_root(ROOT), ROOT);
    }
}
