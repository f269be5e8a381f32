//! End-to-end tests for the bandwidth worker against a local HTTP server
//! that plays both the HedNet API and the download host.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::Value;
use tokio::time::{sleep, timeout, Instant};
use url::Url;

use hednet_node::agent::NodeAgent;
use hednet_node::config::NodeConfig;

const FILE_A_LEN: usize = 64 * 1024;
const FILE_B_LEN: usize = 8 * 1024;

#[derive(Default)]
struct TestApi {
    auth_ok: AtomicBool,
    accept_reports: AtomicBool,
    reports: Mutex<Vec<Value>>,
    downloads: Mutex<Vec<String>>,
}

impl TestApi {
    fn new(auth_ok: bool, accept_reports: bool) -> Arc<Self> {
        let api = Self::default();
        api.auth_ok.store(auth_ok, Ordering::SeqCst);
        api.accept_reports.store(accept_reports, Ordering::SeqCst);
        Arc::new(api)
    }

    fn report_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    fn download_log(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

async fn ping(State(api): State<Arc<TestApi>>) -> StatusCode {
    if api.auth_ok.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn bandwidth_point(
    State(api): State<Arc<TestApi>>,
    Json(body): Json<Value>,
) -> StatusCode {
    api.reports.lock().unwrap().push(body);
    if api.accept_reports.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn file(State(api): State<Arc<TestApi>>, Path(name): Path<String>) -> impl IntoResponse {
    api.downloads.lock().unwrap().push(name.clone());
    let len = match name.as_str() {
        "a" => FILE_A_LEN,
        "b" => FILE_B_LEN,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    vec![0xAB_u8; len].into_response()
}

async fn endless(State(api): State<Arc<TestApi>>) -> impl IntoResponse {
    api.downloads.lock().unwrap().push("endless".into());
    let stream = futures_util::stream::unfold((), |()| async {
        sleep(Duration::from_millis(2)).await;
        static CHUNK: [u8; 1024] = [0xCD; 1024];
        Some((Ok::<_, std::io::Error>(Bytes::from_static(&CHUNK)), ()))
    });
    Body::from_stream(stream).into_response()
}

async fn spawn_server(api: Arc<TestApi>) -> SocketAddr {
    let app = Router::new()
        .route("/device/ext/ping", get(ping))
        .route("/device/ext/bandwidth_point", post(bandwidth_point))
        .route("/files/:name", get(file))
        .route("/endless", get(endless))
        .with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn node_config(addr: SocketAddr, resources: &[&str]) -> NodeConfig {
    NodeConfig {
        base_url: Url::parse(&format!("http://{addr}")).unwrap(),
        channel_url: Url::parse(&format!("ws://{addr}/websocket")).unwrap(),
        token: "test-token".into(),
        resources: resources
            .iter()
            .map(|path| Url::parse(&format!("http://{addr}{path}")).unwrap())
            .collect(),
        chunk_delay: Duration::from_millis(1),
        report_threshold: 100 * 1024 * 1024,
        idle_wait: Duration::from_secs(60),
        points_per_hour: 10.0,
        reconnect_delay: Duration::from_millis(50),
        error_backoff: Duration::from_millis(50),
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn worker_accounts_every_byte_and_flushes_on_stop() {
    let api = TestApi::new(true, true);
    let addr = spawn_server(api.clone()).await;

    let mut agent = NodeAgent::new(node_config(addr, &["/files/a"])).unwrap();
    assert!(agent.start().await);

    // end-of-resource report
    wait_until("first report", || api.report_count() >= 1).await;
    let state = agent.state();
    assert_eq!(state.total_bytes(), FILE_A_LEN as u64);
    {
        let reports = api.reports.lock().unwrap();
        assert_eq!(
            reports[0].get("total_bytes").and_then(Value::as_u64),
            Some(FILE_A_LEN as u64)
        );
        assert!(reports[0].get("added_point").and_then(Value::as_f64).unwrap() > 0.0);
    }

    let before_stop = api.report_count();
    agent.stop().await;

    // points were accrued, so stop sends exactly one final flush
    assert_eq!(api.report_count(), before_stop + 1);
    let expected = 2.0 * 10.0 / 3600.0;
    assert!((state.session_points() - expected).abs() < 1e-9);
}

#[tokio::test]
async fn threshold_crossings_trigger_interim_reports() {
    let api = TestApi::new(true, true);
    let addr = spawn_server(api.clone()).await;

    let mut config = node_config(addr, &["/files/a"]);
    config.report_threshold = 16 * 1024; // well below the 64 KiB resource

    let mut agent = NodeAgent::new(config).unwrap();
    assert!(agent.start().await);

    // at least one interim report plus the end-of-resource report
    wait_until("interim + final reports", || api.report_count() >= 2).await;
    agent.stop().await;

    let reports = api.reports.lock().unwrap();
    let last_cycle_report = reports
        .iter()
        .filter_map(|r| r.get("total_bytes").and_then(Value::as_u64))
        .max()
        .unwrap();
    assert_eq!(last_cycle_report, FILE_A_LEN as u64);
}

#[tokio::test]
async fn resources_rotate_round_robin() {
    let api = TestApi::new(true, true);
    let addr = spawn_server(api.clone()).await;

    let mut config = node_config(addr, &["/files/a", "/files/b"]);
    config.idle_wait = Duration::from_millis(5);

    let mut agent = NodeAgent::new(config).unwrap();
    assert!(agent.start().await);

    wait_until("three downloads", || api.download_log().len() >= 3).await;
    agent.stop().await;

    let log = api.download_log();
    assert_eq!(&log[..3], &["a".to_string(), "b".to_string(), "a".to_string()]);
}

#[tokio::test]
async fn rejected_reports_leave_points_uncredited() {
    let api = TestApi::new(true, false);
    let addr = spawn_server(api.clone()).await;

    let mut agent = NodeAgent::new(node_config(addr, &["/files/a"])).unwrap();
    assert!(agent.start().await);

    wait_until("rejected report", || api.report_count() >= 1).await;
    let state = agent.state();
    assert_eq!(state.session_points(), 0.0);
    assert_eq!(state.total_bytes(), FILE_A_LEN as u64);

    let before_stop = api.report_count();
    agent.stop().await;

    // nothing was credited, so no final flush goes out
    assert_eq!(api.report_count(), before_stop);
    assert_eq!(state.session_points(), 0.0);
}

#[tokio::test]
async fn rejected_authentication_starts_nothing() {
    let api = TestApi::new(false, true);
    let addr = spawn_server(api.clone()).await;

    let mut agent = NodeAgent::new(node_config(addr, &["/files/a"])).unwrap();
    assert!(!agent.start().await);

    sleep(Duration::from_millis(100)).await;
    assert!(api.download_log().is_empty());
    assert_eq!(api.report_count(), 0);
    assert!(!agent.state().is_running());
}

#[tokio::test]
async fn stop_interrupts_an_endless_stream_promptly() {
    let api = TestApi::new(true, true);
    let addr = spawn_server(api.clone()).await;

    let mut agent = NodeAgent::new(node_config(addr, &["/endless"])).unwrap();
    assert!(agent.start().await);

    let state = agent.state();
    wait_until("stream progress", || state.total_bytes() > 0).await;

    timeout(Duration::from_secs(5), agent.stop())
        .await
        .expect("stop should interrupt the download quickly");

    // accrual halts once stopped
    let frozen = state.total_bytes();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(state.total_bytes(), frozen);
}
