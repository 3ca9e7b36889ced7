//! ---
//! fdo_section: "05-integration"
//! fdo_subsection: "test"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Probe budgets and sequence semantics against a mock HTTP server."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fdo_env_common::config::EndpointsConfig;
use fdo_env_probe::fdo::{get_rvinfo_steps, publish_rvinfo_steps, send_voucher_steps, voucher_params};
use fdo_env_probe::{Payload, ProbeStep, RetryPolicy, Sequencer, StepError};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Default)]
struct Mock {
    hits: Mutex<HashMap<&'static str, usize>>,
    rvinfo: Mutex<Value>,
    uploaded: Mutex<Option<(String, Vec<u8>)>>,
}

impl Mock {
    fn hit(&self, key: &'static str) -> usize {
        let mut hits = self.hits.lock().unwrap();
        let count = hits.entry(key).or_default();
        *count += 1;
        *count
    }

    fn hits(&self, key: &'static str) -> usize {
        self.hits.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

type Shared = State<Arc<Mock>>;

async fn never(State(mock): Shared) -> StatusCode {
    mock.hit("never");
    StatusCode::SERVICE_UNAVAILABLE
}

async fn flaky(State(mock): Shared) -> StatusCode {
    if mock.hit("flaky") < 3 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn step_a(State(mock): Shared) -> &'static str {
    mock.hit("a");
    "a"
}

async fn step_b(State(mock): Shared) -> StatusCode {
    mock.hit("b");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn step_c(State(mock): Shared) -> &'static str {
    mock.hit("c");
    "c"
}

async fn voucher(State(mock): Shared, Path(guid): Path<String>) -> impl IntoResponse {
    mock.hit("voucher");
    (
        [(header::CONTENT_TYPE, "application/x-pem-file")],
        format!("-----BEGIN OWNERSHIP VOUCHER-----\n{guid}\n"),
    )
}

async fn upload(State(mock): Shared, headers: HeaderMap, body: Bytes) -> StatusCode {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    *mock.uploaded.lock().unwrap() = Some((content_type, body.to_vec()));
    StatusCode::CREATED
}

async fn put_rvinfo(State(mock): Shared, Json(body): Json<Value>) -> StatusCode {
    *mock.rvinfo.lock().unwrap() = body;
    StatusCode::OK
}

async fn get_rvinfo(State(mock): Shared) -> Json<Value> {
    mock.hit("rvinfo");
    Json(mock.rvinfo.lock().unwrap().clone())
}

async fn spawn_mock() -> (SocketAddr, Arc<Mock>) {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/never", get(never))
        .route("/flaky", get(flaky))
        .route("/a", get(step_a))
        .route("/b", get(step_b))
        .route("/c", get(step_c))
        .route("/api/v1/vouchers/:guid", get(voucher))
        .route("/api/v1/owner/vouchers", axum::routing::post(upload))
        .route("/api/v1/rvinfo", get(get_rvinfo).post(put_rvinfo))
        .with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, mock)
}

const GUID: &str = "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0";

fn sequencer() -> Sequencer {
    Sequencer::new(Duration::from_secs(2)).unwrap()
}

fn endpoints(addr: SocketAddr) -> EndpointsConfig {
    let base: url::Url = format!("http://{addr}").parse().unwrap();
    EndpointsConfig {
        manufacturer: base.clone(),
        rendezvous: base.clone(),
        owner: base,
        ..EndpointsConfig::default()
    }
}

#[tokio::test]
async fn probe_spends_exactly_the_budget() {
    let (addr, mock) = spawn_mock().await;
    let err = sequencer()
        .probe(
            &format!("http://{addr}/never"),
            Duration::from_secs(1),
            &RetryPolicy::fixed(3, Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 3);
    assert_eq!(err.last_status, Some(503));
    assert_eq!(mock.hits("never"), 3);
}

#[tokio::test]
async fn probe_recovers_from_transient_failures() {
    let (addr, mock) = spawn_mock().await;
    sequencer()
        .probe(
            &format!("http://{addr}/flaky"),
            Duration::from_secs(1),
            &RetryPolicy::exponential(5, Duration::from_millis(5), Duration::from_millis(20)),
        )
        .await
        .unwrap();
    assert_eq!(mock.hits("flaky"), 3);
}

#[tokio::test]
async fn unreachable_target_reports_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = sequencer()
        .probe(
            &format!("http://{addr}/health"),
            Duration::from_millis(500),
            &RetryPolicy::fixed(2, Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 2);
    assert_eq!(err.last_status, None);
    assert!(err.last_error.is_some());
}

#[tokio::test]
async fn sequence_stops_at_first_failing_step() {
    let (addr, mock) = spawn_mock().await;
    let steps = vec![
        ProbeStep::get("a", format!("http://{addr}/a")),
        ProbeStep::get("b", format!("http://{addr}/b")),
        ProbeStep::get("c", format!("http://{addr}/c")),
    ];
    let err = sequencer().run_sequence(&steps).await.unwrap_err();
    assert_eq!(err.failed_step_index, 1);
    assert_eq!(err.step_name, "b");
    match err.cause {
        StepError::Probe(probe) => assert_eq!(probe.last_status, Some(500)),
        other => panic!("unexpected cause {other}"),
    }
    assert_eq!(mock.hits("a"), 1);
    assert_eq!(mock.hits("c"), 0);
}

#[tokio::test]
async fn voucher_is_forwarded_to_owner() {
    let (addr, mock) = spawn_mock().await;
    let steps = send_voucher_steps(&endpoints(addr));
    let outputs = sequencer()
        .run_sequence_with(&steps, &voucher_params(GUID).unwrap())
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1].status, 201);

    let (content_type, body) = mock.uploaded.lock().unwrap().clone().unwrap();
    assert_eq!(content_type, "application/x-pem-file");
    assert_eq!(body, outputs[0].body);
    assert!(outputs[0].text().contains(GUID));
}

#[tokio::test]
async fn hostile_guid_cannot_reach_other_endpoints() {
    let (addr, mock) = spawn_mock().await;
    let steps = send_voucher_steps(&endpoints(addr));
    let hostile = "x/../../rvinfo";
    assert!(matches!(voucher_params(hostile), Err(StepError::InvalidGuid(_))));

    // Even unvalidated, the value stays inside the voucher path segment.
    let params = fdo_env_common::template::Params::from([("guid".to_owned(), hostile.to_owned())]);
    let outputs = sequencer().run_sequence_with(&steps, &params).await.unwrap();
    assert!(outputs[0].text().contains(hostile));
    assert_eq!(mock.hits("voucher"), 1);
    assert_eq!(mock.hits("rvinfo"), 0);

    *mock.uploaded.lock().unwrap() = None;
    let params = fdo_env_common::template::Params::from([("guid".to_owned(), "..".to_owned())]);
    let err = sequencer().run_sequence_with(&steps, &params).await.unwrap_err();
    assert_eq!(err.failed_step_index, 0);
    assert!(matches!(err.cause, StepError::InvalidUrl { .. }));
    assert_eq!(mock.hits("voucher"), 1);
    assert!(mock.uploaded.lock().unwrap().is_none());
}

#[tokio::test]
async fn missing_guid_fails_before_any_request() {
    let (addr, mock) = spawn_mock().await;
    let steps = send_voucher_steps(&endpoints(addr));
    let err = sequencer().run_sequence(&steps).await.unwrap_err();
    assert_eq!(err.failed_step_index, 0);
    assert!(matches!(err.cause, StepError::UnknownParameter(ref name) if name == "guid"));
    assert_eq!(mock.hits("voucher"), 0);
}

#[tokio::test]
async fn published_rvinfo_reads_back() {
    let (addr, _mock) = spawn_mock().await;
    let endpoints = endpoints(addr);
    let config = fdo_env_common::EnvConfig::default();
    let sequencer = sequencer();

    sequencer
        .run_sequence(&publish_rvinfo_steps(&endpoints, &config.rendezvous).unwrap())
        .await
        .unwrap();
    let outputs = sequencer
        .run_sequence(&get_rvinfo_steps(&endpoints))
        .await
        .unwrap();
    let body = outputs[0].json().unwrap();
    assert_eq!(body[0]["dns"], "localhost");
    assert_eq!(body[0]["device_port"], "8041");
}

#[tokio::test]
async fn text_payload_is_templated() {
    let (addr, mock) = spawn_mock().await;
    let step = ProbeStep::post(
        "upload",
        format!("http://{addr}/api/v1/owner/vouchers"),
        Payload::Text("voucher for {guid}".into()),
    );
    sequencer()
        .run_sequence_with(&[step], &voucher_params(GUID).unwrap())
        .await
        .unwrap();
    let (content_type, body) = mock.uploaded.lock().unwrap().clone().unwrap();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(body, format!("voucher for {GUID}").into_bytes());
}
