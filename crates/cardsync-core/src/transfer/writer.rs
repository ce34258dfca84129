//! 本地文件保存
//!
//! 覆盖写入时，目标文件可能被其他程序（图片查看器、杀毒软件）短暂占用，
//! 此时稍等后重试；不覆盖时只能新建文件，已存在即失败。

use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// 覆盖写入时的最大尝试次数
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// 重试间隔
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// 本地写入错误
#[derive(Debug, thiserror::Error)]
pub enum LocalWriteError {
    #[error("file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("file is in use: {}", .0.display())]
    Locked(PathBuf),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 保存数据到本地文件，必要时创建父目录
pub async fn save_file(path: &Path, data: &[u8], overwrite: bool) -> Result<(), LocalWriteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| LocalWriteError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    if !overwrite {
        return write_once(path, data, false).await;
    }

    let mut attempt = 1;
    loop {
        match write_once(path, data, true).await {
            Err(LocalWriteError::Locked(_)) if attempt < MAX_WRITE_ATTEMPTS => {
                warn!(
                    "{} is in use, retrying ({}/{})",
                    path.display(),
                    attempt,
                    MAX_WRITE_ATTEMPTS
                );
                tokio::time::sleep(WRITE_RETRY_DELAY).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn write_once(path: &Path, data: &[u8], overwrite: bool) -> Result<(), LocalWriteError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = options.open(path).await.map_err(|e| classify(path, e))?;
    file.write_all(data).await.map_err(|e| classify(path, e))?;
    file.flush().await.map_err(|e| classify(path, e))?;

    debug!("Saved {} ({} bytes)", path.display(), data.len());
    Ok(())
}

fn classify(path: &Path, source: std::io::Error) -> LocalWriteError {
    match source.kind() {
        ErrorKind::AlreadyExists => LocalWriteError::AlreadyExists(path.to_path_buf()),
        ErrorKind::PermissionDenied
        | ErrorKind::ResourceBusy
        | ErrorKind::WouldBlock
        | ErrorKind::Interrupted => LocalWriteError::Locked(path.to_path_buf()),
        _ => LocalWriteError::Io {
            path: path.to_path_buf(),
            source,
        },
    }
}

/// 本地是否已有同名且大小相同的文件
pub async fn is_same_size(path: &Path, size: u64) -> bool {
    fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() == size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_new_and_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20240101").join("A.JPG");

        save_file(&path, b"first", false).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        let err = save_file(&path, b"second", false).await.unwrap_err();
        assert!(matches!(err, LocalWriteError::AlreadyExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.JPG");

        save_file(&path, b"a longer first version", true).await.unwrap();
        save_file(&path, b"short", true).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_is_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.JPG");
        assert!(!is_same_size(&path, 5).await);

        save_file(&path, b"12345", false).await.unwrap();
        assert!(is_same_size(&path, 5).await);
        assert!(!is_same_size(&path, 6).await);
        assert!(!is_same_size(dir.path(), 0).await);
    }
}
