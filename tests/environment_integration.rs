//! ---
//! fdo_section: "06-testing"
//! fdo_subsection: "integration-tests"
//! fdo_type: "source"
//! fdo_scope: "code"
//! fdo_description: "Cross-crate flow over a provisioned fixture and a mock FDO API."
//! fdo_version: "v0.1.0"
//! fdo_owner: "tbd"
//! ---
#![cfg(unix)]

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use fdo_env_common::config::{Endpoint, EndpointsConfig, OrchestratorConfig, PkiConfig};
use fdo_env_common::template::render;
use fdo_env_orchestrator::{ProcessOrchestrator, ProcessStatus, Runtime};
use fdo_env_pki::{ensure_fixture, Provisioner, Role};
use fdo_env_probe::fdo::{health_steps, send_voucher_steps, voucher_params};
use fdo_env_probe::{RetryPolicy, Sequencer};
use tempfile::tempdir;
use tokio::net::TcpListener;

type Uploads = Arc<Mutex<Vec<Vec<u8>>>>;

async fn voucher(Path(guid): Path<String>) -> String {
    format!("voucher:{guid}")
}

async fn upload(State(uploads): State<Uploads>, body: Bytes) -> StatusCode {
    uploads.lock().unwrap().push(body.to_vec());
    StatusCode::OK
}

#[tokio::test]
async fn provision_start_probe_and_transfer_voucher() {
    // Fixture and trust material
    let dir = tempdir().unwrap();
    let fixture = ensure_fixture(dir.path().join("env")).unwrap();
    let provisioned = Provisioner::from_config(fixture.clone(), &PkiConfig::default())
        .provision_all()
        .unwrap();
    assert_eq!(provisioned.len(), Role::ALL.len());
    assert!(provisioned.iter().all(|p| p.key.is_new() && p.certificate.is_new()));

    // Mock FDO API
    let uploads = Uploads::default();
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/vouchers/:guid", get(voucher))
        .route("/api/v1/owner/vouchers", post(upload))
        .with_state(uploads.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base: url::Url = format!("http://{addr}").parse().unwrap();
    let endpoints = EndpointsConfig {
        manufacturer: base.clone(),
        rendezvous: base.clone(),
        owner: base,
        ..EndpointsConfig::default()
    };

    // Service lifecycle with readiness probing
    let mut orchestrator = ProcessOrchestrator::new(&OrchestratorConfig {
        log_dir: Some(fixture.db_dir().to_path_buf()),
        stop_grace: Duration::from_secs(2),
    });
    orchestrator
        .start("manufacturer", Runtime::local("sleep", ["30"]), vec![8038])
        .await
        .unwrap();
    let sequencer = Sequencer::new(Duration::from_secs(2)).unwrap();
    let retry = RetryPolicy::fixed(5, Duration::from_millis(20));
    sequencer
        .run_sequence(&health_steps(&endpoints, &Endpoint::ALL, retry))
        .await
        .unwrap();
    let running = orchestrator.mark_running("manufacturer").unwrap();
    assert_eq!(running.status, ProcessStatus::Running);

    // Device initialisation writes its GUID into the fixture
    let guid_file = render("{files}/device.guid", &fixture.params()).unwrap();
    let di = Runtime::local("sh", ["-c".to_owned(), format!("echo 42aa42aa42aa42aa42aa42aa42aa42aa > {guid_file}")]);
    orchestrator
        .run_to_completion("device-di", &di, Duration::from_secs(5))
        .await
        .unwrap();
    let guid = fs::read_to_string(fixture.files_dir().join("device.guid")).unwrap();

    // Voucher transfer
    let outputs = sequencer
        .run_sequence_with(&send_voucher_steps(&endpoints), &voucher_params(&guid).unwrap())
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(uploads.lock().unwrap().as_slice(), [b"voucher:42aa42aa42aa42aa42aa42aa42aa42aa".to_vec()]);

    // Teardown
    orchestrator.stop_all().await.unwrap();
    assert_eq!(
        orchestrator.status("manufacturer").map(|p| p.status),
        Some(ProcessStatus::Stopped)
    );
}
