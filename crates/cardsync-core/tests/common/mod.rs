//! 测试用的模拟设备与网络状态

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, RawQuery, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use cardsync_core::{
    CardState, DownloadEngine, EngineOptions, NetworkMonitor, NetworkStateProvider,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const OLD_FIRMWARE: &str = "F19BAW3AW1.00.00";
pub const NEW_FIRMWARE: &str = "F15DBW3BW4.00.02";
pub const CID: &str = "02544d5357303847075000a01e00c701";

/// 模拟卡片的内容与行为
#[derive(Debug, Default)]
pub struct MockCard {
    pub firmware: String,
    pub ssid: String,
    pub cid: String,
    /// 目录 -> 列表行（不含首行）
    pub listings: HashMap<String, Vec<String>>,
    /// 路径 -> 文件内容
    pub files: HashMap<String, Vec<u8>>,
    pub update_status: bool,
    pub write_timestamp: i64,
    pub upload_enabled: bool,
    pub delete_response: String,
    pub deleted: Vec<String>,
    /// 接下来的请求直接返回该状态码
    pub fail_next: usize,
    pub fail_status: u16,
    /// 收到的请求（路径 + 查询）
    pub requests: Vec<String>,
}

impl MockCard {
    pub fn new(firmware: &str) -> Self {
        Self {
            firmware: firmware.to_string(),
            ssid: "flashair_card".to_string(),
            cid: CID.to_string(),
            upload_enabled: true,
            delete_response: "SUCCESS".to_string(),
            fail_status: 503,
            ..Default::default()
        }
    }

    pub fn add_listing(&mut self, directory: &str, lines: &[&str]) {
        self.listings.insert(
            directory.to_string(),
            lines.iter().map(ToString::to_string).collect(),
        );
    }

    pub fn add_file(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(path.to_string(), data);
    }

    /// 记录请求，需要模拟失败时返回状态码
    fn begin(&mut self, uri: &Uri) -> Option<StatusCode> {
        self.requests.push(uri.to_string());
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return StatusCode::from_u16(self.fail_status).ok();
        }
        None
    }

    pub fn count_requests(&self, needle: &str) -> usize {
        self.requests.iter().filter(|r| r.contains(needle)).count()
    }
}

pub type SharedCard = Arc<Mutex<MockCard>>;

async fn command(
    State(card): State<SharedCard>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut card = card.lock().unwrap();
    if let Some(status) = card.begin(&uri) {
        return status.into_response();
    }

    let op = params.get("op").map(String::as_str).unwrap_or_default();
    let body = match op {
        "100" => {
            let dir = params.get("DIR").cloned().unwrap_or_default();
            let Some(lines) = card.listings.get(&dir) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let mut body = String::from("WLANSD_FILELIST\r\n");
            for line in lines {
                body.push_str(line);
                body.push_str("\r\n");
            }
            body
        }
        "101" => {
            let dir = params.get("DIR").cloned().unwrap_or_default();
            card.listings.get(&dir).map_or(0, Vec::len).to_string()
        }
        "102" => flag(card.update_status),
        "104" => card.ssid.clone(),
        "108" => card.firmware.clone(),
        "118" => flag(card.upload_enabled),
        "120" => card.cid.clone(),
        "121" => card.write_timestamp.to_string(),
        "140" => "1000/2000,512".to_string(),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    body.into_response()
}

fn flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

async fn thumbnail(State(card): State<SharedCard>, uri: Uri, RawQuery(query): RawQuery) -> Response {
    let mut card = card.lock().unwrap();
    if let Some(status) = card.begin(&uri) {
        return status.into_response();
    }
    let path = query.unwrap_or_default();
    if card.files.contains_key(&path) {
        vec![0xFF, 0xD8, 0xFF, 0xD9].into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn upload(State(card): State<SharedCard>, uri: Uri, RawQuery(query): RawQuery) -> Response {
    let mut card = card.lock().unwrap();
    if let Some(status) = card.begin(&uri) {
        return status.into_response();
    }
    let Some(path) = query.as_deref().and_then(|q| q.strip_prefix("DEL=")) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let path = path.to_string();
    if card.delete_response == "SUCCESS" {
        card.files.remove(&path);
        card.deleted.push(path);
    }
    card.delete_response.clone().into_response()
}

async fn raw_file(State(card): State<SharedCard>, uri: Uri) -> Response {
    let mut card = card.lock().unwrap();
    if let Some(status) = card.begin(&uri) {
        return status.into_response();
    }
    match card.files.get(uri.path()) {
        Some(data) => data.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// 启动模拟设备，返回根 URL
pub async fn start_mock(card: MockCard) -> (String, SharedCard) {
    let card = Arc::new(Mutex::new(card));
    let app = Router::new()
        .route("/command.cgi", get(command))
        .route("/thumbnail.cgi", get(thumbnail))
        .route("/upload.cgi", get(upload))
        .fallback(raw_file)
        .with_state(card.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/"), card)
}

/// 可控的主机网络状态
#[derive(Debug)]
pub struct FakeNetwork {
    pub reachable: AtomicBool,
    pub ssids: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(true),
            ssids: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        let network = Self::reachable();
        network.reachable.store(false, Ordering::SeqCst);
        network
    }
}

#[async_trait]
impl NetworkStateProvider for FakeNetwork {
    async fn wireless_ssids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.ssids.lock().unwrap().clone())
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

pub fn fast_options() -> EngineOptions {
    EngineOptions {
        header_timeout: Duration::from_secs(5),
        chunk_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(10),
    }
}

pub fn engine_with(
    remote_root: &str,
    network: Arc<FakeNetwork>,
    monitor_interval: Duration,
    options: EngineOptions,
) -> DownloadEngine {
    let monitor = NetworkMonitor::new(network, monitor_interval);
    DownloadEngine::new(remote_root, Arc::new(CardState::new()), monitor, options).unwrap()
}

pub fn engine(remote_root: &str) -> DownloadEngine {
    engine_with(
        remote_root,
        FakeNetwork::reachable(),
        Duration::from_secs(60),
        fast_options(),
    )
}
