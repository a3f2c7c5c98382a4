use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use threat_gate::api::{ApiConfig, ApiServer};
use threat_gate::snapshot::encode_png;
use threat_gate::{
    Collaborators, CoordinatorConfig, DisabledNotifier, Frame, InMemoryAlertStore,
    InMemorySnapshotStore, IngestCoordinator, MotionSequenceClassifier, StubObjectDetector,
};

fn coordinator() -> Arc<IngestCoordinator> {
    let collaborators = Collaborators {
        object_detector: Arc::new(StubObjectDetector::new()),
        sequence_classifier: Arc::new(MotionSequenceClassifier::new()),
        snapshots: Arc::new(InMemorySnapshotStore::new()),
        notifier: Arc::new(DisabledNotifier),
        alerts: Arc::new(InMemoryAlertStore::new()),
    };
    let config = CoordinatorConfig {
        window_len: 2,
        ..CoordinatorConfig::default()
    };
    Arc::new(IngestCoordinator::new(config, collaborators).expect("coordinator"))
}

fn spawn() -> (threat_gate::api::ApiHandle, Arc<IngestCoordinator>) {
    let coordinator = coordinator();
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        ..ApiConfig::default()
    };
    let handle = ApiServer::new(cfg, coordinator.clone())
        .spawn()
        .expect("spawn api");
    (handle, coordinator)
}

fn request(addr: SocketAddr, method: &str, path: &str, body: &[u8]) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    let head = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {len}\r\n\r\n",
        method = method,
        path = path,
        addr = addr,
        len = body.len()
    );
    stream.write_all(head.as_bytes()).expect("write head");
    stream.write_all(body).expect("write body");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).expect("read response");
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&response[..split]).into_owned();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    (status, response[split + 4..].to_vec())
}

fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("json body")
}

fn red_png() -> Vec<u8> {
    let pixels = [220u8, 20, 20].repeat(16 * 16);
    encode_png(&Frame::from_rgb(pixels, 16, 16, 0).unwrap()).unwrap()
}

fn grey_png() -> Vec<u8> {
    encode_png(&Frame::from_rgb(vec![90u8; 16 * 16 * 3], 16, 16, 0).unwrap()).unwrap()
}

#[test]
fn health_reports_known_sources() {
    let (handle, _) = spawn();

    let (status, body) = request(handle.addr, "GET", "/health", b"");
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sources"], serde_json::json!([]));

    handle.stop().unwrap();
}

#[test]
fn uploaded_frames_flow_through_to_alerts_and_evidence() {
    let (handle, coordinator) = spawn();

    let (status, body) = request(handle.addr, "POST", "/frames?source=dock-3", &grey_png());
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["status"], "Safe");
    assert_eq!(body["sequence"], "insufficient");
    assert_eq!(body["alert_fired"], false);

    let (status, body) = request(
        handle.addr,
        "POST",
        "/frames?source=dock-3&threshold=0.5",
        &red_png(),
    );
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["status"], "Violence/Weapon");
    assert_eq!(body["alert_fired"], true);
    assert_eq!(body["notify"], "disabled");

    let (status, body) = request(handle.addr, "GET", "/alerts?limit=5", b"");
    assert_eq!(status, 200);
    let body = json(&body);
    let alerts = body["alerts"].as_array().expect("alerts array");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["source"], "dock-3");
    assert_eq!(alerts[0]["notify"], "disabled");
    let evidence_id = alerts[0]["evidence_id"].as_str().expect("evidence id");

    let (status, png) = request(handle.addr, "GET", &format!("/evidence/{}", evidence_id), b"");
    assert_eq!(status, 200);
    let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (16, 16));

    assert_eq!(coordinator.sources(), vec!["dock-3"]);
    handle.stop().unwrap();
}

#[test]
fn default_source_is_used_without_query() {
    let (handle, coordinator) = spawn();

    let (status, body) = request(handle.addr, "POST", "/frames", &grey_png());
    assert_eq!(status, 200);
    assert_eq!(json(&body)["source"], "camera_01");
    assert_eq!(coordinator.sources(), vec!["camera_01"]);

    handle.stop().unwrap();
}

#[test]
fn bad_requests_are_rejected() {
    let (handle, coordinator) = spawn();

    let (status, _) = request(handle.addr, "POST", "/frames?source=cam1", b"not an image");
    assert_eq!(status, 400);
    let (status, _) = request(handle.addr, "POST", "/frames?source=a%2Fb", &grey_png());
    assert_eq!(status, 400);
    let (status, _) = request(handle.addr, "POST", "/frames?threshold=2", &grey_png());
    assert_eq!(status, 400);
    let (status, _) = request(handle.addr, "GET", "/alerts?limit=abc", b"");
    assert_eq!(status, 400);
    let (status, _) = request(handle.addr, "GET", "/evidence/..%2Fetc.png", b"");
    assert_eq!(status, 400);
    let (status, _) = request(handle.addr, "GET", "/evidence/alert_missing.png", b"");
    assert_eq!(status, 404);
    let (status, _) = request(handle.addr, "DELETE", "/alerts", b"");
    assert_eq!(status, 405);
    let (status, _) = request(handle.addr, "GET", "/nope", b"");
    assert_eq!(status, 404);
    assert!(coordinator.sources().is_empty());

    coordinator.shutdown();
    let (status, _) = request(handle.addr, "POST", "/frames", &grey_png());
    assert_eq!(status, 503);

    handle.stop().unwrap();
}
