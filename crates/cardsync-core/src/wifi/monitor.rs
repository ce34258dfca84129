//! 网络断开监视器
//!
//! 在每次与设备的字节传输期间运行，一旦判断主机与设备之间的链路断开，
//! 就取消专用的 `CancellationToken`，让正在进行的读取立即结束。
//!
//! # 模式
//!
//! - **定时模式**（非无线直连）: 按固定间隔探测设备可达性，首次失败即触发。
//!   探测从第一次 [`MonitorGuard::restart`]（收到响应头）开始，等待响应头期间
//!   不会向设备发起第二个连接。之后每收到一块数据都会再次调用 `restart`
//!   推迟下一次探测。
//! - **事件模式**（无线直连）: 等待平台的无线断开通知，只有设备热点本身
//!   的断开才会触发；事件源不可用时退回定时模式。

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::wifi::nm_dbus::NmClient;
use crate::wifi::probe::TcpProbe;

/// 轮询 SSID 的默认间隔
const SSID_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 主机网络状态来源
#[async_trait]
pub trait NetworkStateProvider: Send + Sync {
    /// 主机当前关联的无线网络 SSID
    async fn wireless_ssids(&self) -> anyhow::Result<Vec<String>>;

    /// 设备当前是否可达（定时模式使用）
    async fn is_reachable(&self) -> bool;

    /// 等待指定 SSID 断开
    ///
    /// 默认实现轮询 [`wireless_ssids`](Self::wireless_ssids)，
    /// 有推送通知的平台应覆盖此方法。
    async fn wait_for_disconnect(&self, ssid: &str) -> anyhow::Result<()> {
        poll_for_ssid_loss(self, ssid).await
    }
}

async fn poll_for_ssid_loss<P: NetworkStateProvider + ?Sized>(
    provider: &P,
    ssid: &str,
) -> anyhow::Result<()> {
    loop {
        if !provider.wireless_ssids().await?.iter().any(|s| s == ssid) {
            return Ok(());
        }
        tokio::time::sleep(SSID_POLL_INTERVAL).await;
    }
}

/// 系统网络状态: TCP 探测 + NetworkManager（可用时）
pub struct SystemNetworkProvider {
    probe: TcpProbe,
    nm: Option<NmClient>,
}

impl SystemNetworkProvider {
    /// 根据设备根 URL 创建
    ///
    /// NetworkManager 不可用时仍可工作，只是无线事件退化为轮询。
    pub async fn connect(remote_root: &str) -> Self {
        let probe = TcpProbe::from_url(remote_root).unwrap_or_else(|| {
            warn!("Cannot derive probe address from {}, using default", remote_root);
            TcpProbe::new("flashair:80")
        });

        let nm = match NmClient::new().await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("NetworkManager unavailable, wireless events disabled: {:#}", e);
                None
            }
        };

        Self { probe, nm }
    }
}

#[async_trait]
impl NetworkStateProvider for SystemNetworkProvider {
    async fn wireless_ssids(&self) -> anyhow::Result<Vec<String>> {
        match &self.nm {
            Some(nm) => nm.connected_ssids().await,
            None => Ok(Vec::new()),
        }
    }

    async fn is_reachable(&self) -> bool {
        self.probe.check().await
    }

    async fn wait_for_disconnect(&self, ssid: &str) -> anyhow::Result<()> {
        match &self.nm {
            Some(nm) => nm.wait_for_ssid_loss(ssid).await,
            None => poll_for_ssid_loss(self, ssid).await,
        }
    }
}

/// 监视模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorMode {
    /// 定时探测
    Timer,
    /// 等待指定 SSID 的断开事件
    Wireless { ssid: String },
}

/// 网络断开监视器
#[derive(Clone)]
pub struct NetworkMonitor {
    provider: Arc<dyn NetworkStateProvider>,
    interval: Duration,
}

impl NetworkMonitor {
    pub fn new(provider: Arc<dyn NetworkStateProvider>, interval: Duration) -> Self {
        Self { provider, interval }
    }

    pub fn provider(&self) -> &Arc<dyn NetworkStateProvider> {
        &self.provider
    }

    /// 启动监视，返回的 guard 被丢弃时监视任务随之结束
    pub fn start(&self, mode: MonitorMode) -> MonitorGuard {
        let lost = CancellationToken::new();
        let stop = CancellationToken::new();
        let (activity_tx, activity_rx) = watch::channel(None);

        let task = MonitorTask {
            provider: self.provider.clone(),
            interval: self.interval,
            lost: lost.clone(),
            stop: stop.clone(),
            activity: activity_rx,
        };

        debug!("Starting network monitor: {:?}", mode);
        tokio::spawn(task.run(mode));

        MonitorGuard {
            lost,
            stop,
            activity: activity_tx,
        }
    }
}

/// 运行中的监视器句柄
pub struct MonitorGuard {
    lost: CancellationToken,
    stop: CancellationToken,
    activity: watch::Sender<Option<Instant>>,
}

impl MonitorGuard {
    /// 链路断开时被取消的令牌
    pub fn lost(&self) -> &CancellationToken {
        &self.lost
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// 链路刚被证明仍然存活，推迟下一次探测（首次调用时开始定时探测）
    pub fn restart(&self) {
        self.activity.send_replace(Some(Instant::now()));
    }

    /// 停止监视（可重复调用）
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct MonitorTask {
    provider: Arc<dyn NetworkStateProvider>,
    interval: Duration,
    lost: CancellationToken,
    stop: CancellationToken,
    activity: watch::Receiver<Option<Instant>>,
}

impl MonitorTask {
    async fn run(mut self, mode: MonitorMode) {
        if let MonitorMode::Wireless { ssid } = &mode {
            let provider = self.provider.clone();
            tokio::select! {
                () = self.stop.cancelled() => return,
                result = provider.wait_for_disconnect(ssid) => match result {
                    Ok(()) => {
                        warn!("Lost wireless connection to '{}'", ssid);
                        self.lost.cancel();
                        return;
                    }
                    Err(e) => {
                        warn!("Wireless events unavailable ({:#}), falling back to polling", e);
                    }
                }
            }
        }

        self.poll().await;
    }

    async fn poll(&mut self) {
        let mut checked_at = Instant::now();

        loop {
            let activity = *self.activity.borrow_and_update();
            let Some(active_at) = activity else {
                // 尚未收到响应头
                tokio::select! {
                    () = self.stop.cancelled() => return,
                    changed = self.activity.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                continue;
            };
            let wake = checked_at.max(active_at) + self.interval;

            tokio::select! {
                () = self.stop.cancelled() => return,
                changed = self.activity.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
                () = tokio::time::sleep_until(wake) => {}
            }

            let reachable = tokio::select! {
                () = self.stop.cancelled() => return,
                reachable = self.provider.is_reachable() => reachable,
            };

            if reachable {
                checked_at = Instant::now();
                continue;
            }

            warn!("Device unreachable, cancelling transfer");
            self.lost.cancel();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// 可控的网络状态
    #[derive(Default)]
    struct FakeProvider {
        reachable: AtomicBool,
        probes: AtomicUsize,
        ssid_present: AtomicBool,
        events_fail: bool,
    }

    #[async_trait]
    impl NetworkStateProvider for FakeProvider {
        async fn wireless_ssids(&self) -> anyhow::Result<Vec<String>> {
            if self.events_fail {
                return Err(anyhow::anyhow!("no event source"));
            }
            let mut ssids = vec!["home".to_string()];
            if self.ssid_present.load(Ordering::SeqCst) {
                ssids.push("card".to_string());
            }
            Ok(ssids)
        }

        async fn is_reachable(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.reachable.load(Ordering::SeqCst)
        }
    }

    fn provider(reachable: bool, ssid_present: bool) -> Arc<FakeProvider> {
        Arc::new(FakeProvider {
            reachable: AtomicBool::new(reachable),
            ssid_present: AtomicBool::new(ssid_present),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_on_unreachable() {
        let fake = provider(true, false);
        let monitor = NetworkMonitor::new(fake.clone(), Duration::from_secs(2));
        let guard = monitor.start(MonitorMode::Timer);
        guard.restart();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!guard.is_lost());
        assert!(fake.probes.load(Ordering::SeqCst) >= 2);

        fake.reachable.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), guard.lost().cancelled())
            .await
            .unwrap();

        // 触发后停止探测
        let probes = fake.probes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.probes.load(Ordering::SeqCst), probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_defers_probe() {
        let fake = provider(false, false);
        let monitor = NetworkMonitor::new(fake.clone(), Duration::from_secs(2));
        let guard = monitor.start(MonitorMode::Timer);

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            guard.restart();
        }
        assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
        assert!(!guard.is_lost());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(guard.is_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let fake = provider(false, false);
        let monitor = NetworkMonitor::new(fake.clone(), Duration::from_secs(1));
        let guard = monitor.start(MonitorMode::Timer);
        guard.restart();
        guard.stop();
        guard.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!guard.is_lost());
        assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wireless_only_tracked_ssid_triggers() {
        let fake = provider(true, true);
        let monitor = NetworkMonitor::new(fake.clone(), Duration::from_secs(1));
        let guard = monitor.start(MonitorMode::Wireless {
            ssid: "card".to_string(),
        });

        // "home" 一直存在，"card" 存在时不触发
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!guard.is_lost());

        fake.ssid_present.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), guard.lost().cancelled())
            .await
            .unwrap();
        // 事件模式不做可达性探测
        assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wireless_falls_back_to_timer() {
        let fake = Arc::new(FakeProvider {
            reachable: AtomicBool::new(false),
            events_fail: true,
            ..Default::default()
        });
        let monitor = NetworkMonitor::new(fake.clone(), Duration::from_secs(1));
        let guard = monitor.start(MonitorMode::Wireless {
            ssid: "card".to_string(),
        });
        guard.restart();

        tokio::time::timeout(Duration::from_secs(5), guard.lost().cancelled())
            .await
            .unwrap();
        assert!(fake.probes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_probe_while_waiting_for_headers() {
        let fake = provider(false, false);
        let monitor = NetworkMonitor::new(fake.clone(), Duration::from_secs(2));
        let guard = monitor.start(MonitorMode::Timer);

        // 设备响应缓慢：等待响应头期间不向设备发起探测连接
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
        assert!(!guard.is_lost());

        // 收到响应头后开始探测
        guard.restart();
        tokio::time::timeout(Duration::from_secs(5), guard.lost().cancelled())
            .await
            .unwrap();
        assert_eq!(fake.probes.load(Ordering::SeqCst), 1);
    }
}
