//! Loopback HTTP surface over an `IngestCoordinator`.
//!
//! Routes:
//! - `GET /health`
//! - `GET /alerts?limit=N`
//! - `GET /evidence/<evidence_id>`
//! - `POST /frames?source=<key>&threshold=<0..1>` with a PNG or JPEG body

use crate::coordinator::{IngestCoordinator, IngestError, IngestOutcome};
use crate::frame::Frame;
use crate::snapshot::validate_evidence_id;
use crate::storage::MAX_QUERY_LIMIT;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_CONNECTIONS: usize = 8;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Largest accepted `POST /frames` body.
    pub max_frame_bytes: usize,
    /// Connections handled at once; extra connections get 503.
    pub max_connections: usize,
    /// Source used when `POST /frames` carries no `source` parameter.
    pub default_source: String,
    pub default_threshold: f32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_source: "camera_01".to_string(),
            default_threshold: crate::coordinator::DEFAULT_OBJECT_THRESHOLD,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    coordinator: Arc<IngestCoordinator>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, coordinator: Arc<IngestCoordinator>) -> Self {
        Self { cfg, coordinator }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        if !configured_addr.ip().is_loopback() {
            return Err(anyhow!(
                "api must bind a loopback address, got '{}'",
                configured_addr
            ));
        }
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = Arc::new(self.cfg);
        let coordinator = self.coordinator;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, coordinator, shutdown_thread) {
                log::error!("threat api stopped: {}", err);
            }
        });
        log::info!("threat api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: Arc<ApiConfig>,
    coordinator: Arc<IngestCoordinator>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let slots = ConnectionSlots::new(cfg.max_connections);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, _)) => {
                let Some(slot) = slots.try_acquire() else {
                    log::warn!("threat api busy, refusing connection");
                    let refused = stream
                        .set_nonblocking(false)
                        .map_err(anyhow::Error::from)
                        .and_then(|_| write_json_response(&mut stream, 503, r#"{"error":"busy"}"#));
                    if let Err(err) = refused {
                        log::debug!("busy response not delivered: {}", err);
                    }
                    continue;
                };
                let cfg = cfg.clone();
                let coordinator = coordinator.clone();
                std::thread::spawn(move || {
                    let _slot = slot;
                    if let Err(err) = handle_connection(stream, &cfg, &coordinator) {
                        log::warn!("threat api request rejected: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Counts in-flight connection handlers against a fixed limit.
struct ConnectionSlots {
    active: AtomicUsize,
    limit: usize,
}

struct SlotGuard(Arc<ConnectionSlots>);

impl ConnectionSlots {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            limit: limit.max(1),
        })
    }

    fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.limit).then_some(active + 1)
            })
            .ok()
            .map(|_| SlotGuard(self.clone()))
    }

    fn in_use(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    coordinator: &IngestCoordinator,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    if !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream, cfg.max_frame_bytes) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => handle_health(&mut stream, coordinator),
        ("GET", "/alerts") => handle_alerts(&mut stream, &request, coordinator),
        ("GET", path) if path.starts_with("/evidence/") => {
            handle_evidence(&mut stream, &path["/evidence/".len()..], coordinator)
        }
        ("POST", "/frames") => handle_frame(&mut stream, &request, cfg, coordinator),
        (_, "/health" | "/alerts" | "/frames") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn handle_health(stream: &mut TcpStream, coordinator: &IngestCoordinator) -> Result<()> {
    let status = if coordinator.is_shutting_down() {
        "stopping"
    } else {
        "ok"
    };
    let body = serde_json::json!({
        "status": status,
        "sources": coordinator.sources(),
    });
    write_response(stream, 200, "application/json", &serde_json::to_vec(&body)?)
}

fn handle_alerts(
    stream: &mut TcpStream,
    request: &HttpRequest,
    coordinator: &IngestCoordinator,
) -> Result<()> {
    let limit = match request.query_param("limit") {
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) if limit <= MAX_QUERY_LIMIT => limit,
            _ => {
                return write_json_response(stream, 400, r#"{"error":"invalid_limit"}"#);
            }
        },
        None => 0,
    };
    match coordinator.list_recent_alerts(limit) {
        Ok(records) => {
            let body = serde_json::json!({ "alerts": records });
            write_response(stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        Err(err) => {
            log::error!("alert query failed: {:#}", err);
            write_json_response(stream, 500, r#"{"error":"storage_unavailable"}"#)
        }
    }
}

fn handle_evidence(
    stream: &mut TcpStream,
    evidence_id: &str,
    coordinator: &IngestCoordinator,
) -> Result<()> {
    if validate_evidence_id(evidence_id).is_err() {
        return write_json_response(stream, 400, r#"{"error":"invalid_evidence_id"}"#);
    }
    match coordinator.fetch_evidence(evidence_id) {
        Ok(bytes) => write_response(stream, 200, "image/png", &bytes),
        Err(err) => {
            log::debug!("evidence {} unavailable: {:#}", evidence_id, err);
            write_json_response(stream, 404, r#"{"error":"not_found"}"#)
        }
    }
}

fn handle_frame(
    stream: &mut TcpStream,
    request: &HttpRequest,
    cfg: &ApiConfig,
    coordinator: &IngestCoordinator,
) -> Result<()> {
    let source = request
        .query_param("source")
        .unwrap_or_else(|| cfg.default_source.clone());
    let threshold = match request.query_param("threshold") {
        Some(raw) => match raw.parse::<f32>() {
            Ok(threshold) => threshold,
            Err(_) => return write_json_response(stream, 400, r#"{"error":"invalid_threshold"}"#),
        },
        None => cfg.default_threshold,
    };

    let frame = match decode_frame(&request.body) {
        Ok(frame) => frame,
        Err(err) => {
            log::debug!("frame upload for {} rejected: {:#}", source, err);
            return write_json_response(stream, 400, r#"{"error":"invalid_image"}"#);
        }
    };

    match coordinator.ingest(&source, frame, threshold) {
        Ok(outcome) => {
            let body = outcome_json(&outcome);
            write_response(stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        Err(IngestError::InvalidSource(_)) => {
            write_json_response(stream, 400, r#"{"error":"invalid_source"}"#)
        }
        Err(IngestError::SourceMismatch { .. }) => {
            write_json_response(stream, 400, r#"{"error":"source_mismatch"}"#)
        }
        Err(IngestError::InvalidThreshold(_)) => {
            write_json_response(stream, 400, r#"{"error":"invalid_threshold"}"#)
        }
        Err(IngestError::ShuttingDown) => {
            write_json_response(stream, 503, r#"{"error":"shutting_down"}"#)
        }
        Err(IngestError::Persistence(_)) => {
            write_json_response(stream, 500, r#"{"error":"storage_unavailable"}"#)
        }
    }
}

fn decode_frame(body: &[u8]) -> Result<Frame> {
    if body.is_empty() {
        return Err(anyhow!("empty body"));
    }
    let image = image::load_from_memory(body)?.to_rgb8();
    let (width, height) = image.dimensions();
    Frame::now(image.into_raw(), width, height)
}

fn outcome_json(outcome: &IngestOutcome) -> serde_json::Value {
    serde_json::json!({
        "source": outcome.source,
        "status": outcome.danger_label(),
        "danger": outcome.danger,
        "reason": outcome.reason,
        "sequence": outcome.sequence_label,
        "alert_fired": outcome.alert_fired,
        "notify": outcome.notify.as_ref().map(|n| n.to_string()),
        "record_id": outcome.record_id,
    })
}

fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(anyhow!(
            "request body of {} bytes exceeds {}",
            content_length,
            max_body
        ));
    }
    let mut body = data[header_end..].to_vec();
    body.truncate(content_length);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query: query.to_string(),
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query_param(&self, name: &str) -> Option<String> {
        self.query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| percent_decode(v))
    }
}

/// Decodes `%XX` escapes and `+`; malformed escapes pass through unchanged.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match hex::decode(&bytes[i + 1..i + 3]) {
                    Ok(decoded) => {
                        out.extend_from_slice(&decoded);
                        i += 3;
                        continue;
                    }
                    Err(_) => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decoding_handles_escapes() {
        assert_eq!(percent_decode("lobby%3Anorth"), "lobby:north");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("50%"), "50%");
        assert_eq!(percent_decode("%zz1"), "%zz1");
    }

    #[test]
    fn query_params_are_looked_up_by_name() {
        let request = HttpRequest {
            method: "POST".to_string(),
            path: "/frames".to_string(),
            query: "source=cam1&threshold=0.7".to_string(),
            body: Vec::new(),
        };
        assert_eq!(request.query_param("source").as_deref(), Some("cam1"));
        assert_eq!(request.query_param("threshold").as_deref(), Some("0.7"));
        assert_eq!(request.query_param("limit"), None);
    }

    #[test]
    fn connection_slots_cap_concurrent_handlers() {
        let slots = ConnectionSlots::new(2);
        let first = slots.try_acquire().expect("first slot");
        let second = slots.try_acquire().expect("second slot");
        assert!(slots.try_acquire().is_none());
        assert_eq!(slots.in_use(), 2);

        drop(first);
        assert_eq!(slots.in_use(), 1);
        let third = slots.try_acquire().expect("slot freed by drop");

        drop(second);
        drop(third);
        assert_eq!(slots.in_use(), 0);
    }

    #[test]
    fn non_loopback_bind_is_refused() {
        let alerts = Arc::new(crate::storage::InMemoryAlertStore::new());
        let collaborators = crate::coordinator::Collaborators {
            object_detector: Arc::new(crate::detect::StubObjectDetector::new()),
            sequence_classifier: Arc::new(crate::detect::MotionSequenceClassifier::new()),
            snapshots: Arc::new(crate::snapshot::InMemorySnapshotStore::new()),
            notifier: Arc::new(crate::alert::DisabledNotifier),
            alerts,
        };
        let coordinator = Arc::new(
            IngestCoordinator::new(Default::default(), collaborators).unwrap(),
        );
        let cfg = ApiConfig {
            addr: "0.0.0.0:0".to_string(),
            ..ApiConfig::default()
        };
        assert!(ApiServer::new(cfg, coordinator).spawn().is_err());
    }
}
