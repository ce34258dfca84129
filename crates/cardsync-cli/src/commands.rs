//! 子命令实现

use anyhow::{Context, Result};
use cardsync_core::card::sort_entries;
use cardsync_core::transfer::save_file;
use cardsync_core::{
    AppSettings, CidInfo, DownloadEngine, ProgressCallback, ProgressInfo, RemoteError,
    RemoteFileEntry, SimpleSyncCallback, SyncError, SyncEvent, SyncOptions, Synchronizer,
    list_recursive,
};
use std::io::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// 附带面向用户的说明
fn remote_error(error: RemoteError) -> anyhow::Error {
    let text = error.status_text().to_string();
    anyhow::Error::new(error).context(text)
}

fn sync_error(error: SyncError) -> anyhow::Error {
    let text = error.status_text();
    anyhow::Error::new(error).context(text)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn print_progress(progress: ProgressInfo) {
    let speed = progress
        .bytes_per_second()
        .map(|bps| format!("{}/s", format_size(bps as u64)))
        .unwrap_or_default();
    eprint!(
        "\r   {:>5.1}%  {} / {}  {}   ",
        progress.ratio() * 100.0,
        format_size(progress.current),
        format_size(progress.total),
        speed
    );
    if progress.current >= progress.total {
        eprintln!();
    }
    let _ = std::io::stderr().flush();
}

fn print_entry(entry: &RemoteFileEntry) {
    let date = entry
        .date()
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".repeat(19));
    if entry.is_directory() {
        println!("📁 {}  {:>10}  {}/", date, "", entry.file_path());
    } else {
        println!(
            "📄 {}  {:>10}  {}",
            date,
            format_size(entry.size()),
            entry.file_path()
        );
    }
}

pub async fn info(
    engine: DownloadEngine,
    settings: &AppSettings,
    cancel: &CancellationToken,
) -> Result<()> {
    let sync = Synchronizer::new(engine, SyncOptions::from_settings(settings));
    sync.check_card(cancel).await.map_err(remote_error)?;

    let info = sync.engine().card_state().info();
    let capabilities = info.capabilities();

    println!("💳 卡片信息 ({})", sync.engine().remote_root());
    if let Some(snapshot) = &info.snapshot {
        println!("   固件版本: {}", snapshot.firmware_version);
        println!("   SSID: {}", snapshot.ssid);
        println!(
            "   连接方式: {}",
            if snapshot.is_wireless_connected {
                "无线直连"
            } else {
                "经由局域网"
            }
        );

        match snapshot.cid.as_deref() {
            Some(cid) => {
                println!("   CID: {cid}");
                if let Some(decoded) = CidInfo::parse(cid) {
                    println!(
                        "   制造商: 0x{:02X} / {}",
                        decoded.manufacturer_id, decoded.oem_id
                    );
                    println!(
                        "   产品: {} (rev {})",
                        decoded.product_name, decoded.product_revision
                    );
                    println!("   序列号: {:08X}", decoded.serial_number);
                    if let Some(month) = decoded.manufacturing_month() {
                        println!("   制造日期: {month}");
                    }
                }
            }
            None => println!("   CID: 固件不支持"),
        }
    }

    if let Some(capacity) = info.capacity {
        println!(
            "   容量: {} 可用 / {} 总计",
            format_size(capacity.free_bytes),
            format_size(capacity.total_bytes)
        );
    }
    if let Some(enabled) = info.upload_enabled {
        println!("   上传/删除: {}", if enabled { "已启用" } else { "已禁用" });
    }
    if !capabilities.can_get_write_timestamp {
        println!("   (旧版固件: 通过更新标志检测写入)");
    }

    Ok(())
}

pub async fn list(
    engine: &DownloadEngine,
    settings: &AppSettings,
    dir: &str,
    recursive: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut entries = if recursive {
        list_recursive(engine, dir, cancel).await
    } else {
        engine.get_file_list(dir, cancel).await
    }
    .map_err(remote_error)?;
    sort_entries(&mut entries, settings.sort_order());

    if entries.is_empty() {
        println!("📭 目录为空: {dir}");
        return Ok(());
    }

    for entry in &entries {
        print_entry(entry);
    }
    println!("共 {} 项", entries.len());
    Ok(())
}

pub async fn download(
    engine: &DownloadEngine,
    remote: &str,
    local: &Path,
    overwrite: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    println!("📥 下载: {remote}");
    let progress: ProgressCallback<'_> = &print_progress;
    let download = engine
        .download_file(remote, None, cancel, Some(progress))
        .await
        .map_err(remote_error)?;

    save_file(local, &download.data, overwrite)
        .await
        .with_context(|| format!("保存失败: {}", local.display()))?;

    println!(
        "✅ 已保存到 {} ({}, {:.1}s)",
        local.display(),
        format_size(download.data.len() as u64),
        download.elapsed.as_secs_f64()
    );
    Ok(())
}

pub async fn thumbnail(
    engine: &DownloadEngine,
    remote: &str,
    local: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let data = engine
        .get_thumbnail(remote, cancel)
        .await
        .map_err(remote_error)?;

    save_file(local, &data, true)
        .await
        .with_context(|| format!("保存失败: {}", local.display()))?;

    println!("🖼️  缩略图已保存到 {}", local.display());
    Ok(())
}

pub async fn delete(
    engine: DownloadEngine,
    settings: &AppSettings,
    remote: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    // 先读取固件版本，以便按需检查上传开关
    let sync = Synchronizer::new(engine, SyncOptions::from_settings(settings));
    sync.check_card(cancel).await.map_err(remote_error)?;

    sync.engine()
        .delete_file(remote, cancel)
        .await
        .map_err(remote_error)?;

    println!("🗑️  已删除: {remote}");
    Ok(())
}

pub async fn sync(
    engine: DownloadEngine,
    settings: &AppSettings,
    once: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let options = SyncOptions::from_settings(settings);
    println!("🔄 同步到 {}", options.local_folder.display());

    let mut sync = Synchronizer::new(engine, options);
    let (callback, mut events) = SimpleSyncCallback::new();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::Status(entry) => println!("{entry}"),
                SyncEvent::Progress { progress, .. } => print_progress(progress),
                SyncEvent::Saved { path, local_path } => {
                    println!("✅ {} -> {}", path, local_path.display());
                }
                SyncEvent::Error(text) => eprintln!("❌ {text}"),
            }
        }
    });

    let result = if once {
        sync.sync_once(cancel, &callback).await.map(|report| {
            println!(
                "📊 候选 {} 个，下载 {} 个，跳过 {} 个，删除 {} 个，失败 {} 个",
                report.listed, report.downloaded, report.skipped, report.deleted, report.failed
            );
        })
    } else {
        sync.run(cancel, &callback).await
    };

    drop(callback);
    let _ = printer.await;

    match result {
        Ok(()) => Ok(()),
        Err(SyncError::Remote(RemoteError::Cancelled)) => {
            println!("⏹️  已取消");
            Ok(())
        }
        Err(e) => Err(sync_error(e)),
    }
}
