//! threatd - stream fusion and alert gate daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by THREAT_CONFIG, then THREAT_* overrides)
//! 2. Opens the alert store and the evidence snapshot directory
//! 3. Selects detector backends from the registry
//! 4. Serves the loopback HTTP API (frame uploads, alert queries, evidence)
//! 5. Drives one thread per synthetic `stub://` camera
//! 6. Stops accepting frames on Ctrl-C and drains in-flight work

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use threat_gate::{
    api::{ApiConfig, ApiServer},
    config::ThreatdConfig,
    Collaborators, DetectorRegistry, FilesystemSnapshotStore, IngestCoordinator, IngestError,
    SqliteAlertStore, SyntheticConfig, SyntheticSource,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ThreatdConfig::load()?;
    log::info!(
        "threatd {} starting: db={} snapshots={} api={}",
        env!("CARGO_PKG_VERSION"),
        cfg.db_path,
        cfg.snapshot_dir,
        cfg.api_addr
    );

    let registry = build_registry(&cfg)?;
    let (objects, classifiers) = registry.list();
    log::info!(
        "detector backends: object={:?} sequence={:?}",
        objects,
        classifiers
    );

    let object_detector = registry.object_detector(cfg.detection.object_backend.as_deref())?;
    let sequence_classifier =
        registry.sequence_classifier(cfg.detection.sequence_backend.as_deref())?;
    object_detector.warm_up()?;
    sequence_classifier.warm_up()?;
    log::info!(
        "selected backends: object={} sequence={}",
        object_detector.name(),
        sequence_classifier.name()
    );

    let collaborators = Collaborators {
        object_detector,
        sequence_classifier,
        snapshots: Arc::new(FilesystemSnapshotStore::new(&cfg.snapshot_dir)?),
        notifier: cfg.alerts.notifier.build(),
        alerts: Arc::new(SqliteAlertStore::open(&cfg.db_path)?),
    };
    let coordinator = Arc::new(IngestCoordinator::new(
        cfg.coordinator_config(),
        collaborators,
    )?);

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        default_threshold: cfg.detection.object_threshold,
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, coordinator.clone()).spawn()?;
    log::info!("threat api listening on {}", api_handle.addr);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let mut cameras = Vec::new();
    for camera in &cfg.stub.cameras {
        let source = SyntheticSource::new(SyntheticConfig {
            url: format!("stub://{}", camera),
            target_fps: cfg.stub.fps,
            width: cfg.stub.width,
            height: cfg.stub.height,
            ..SyntheticConfig::default()
        })?;
        cameras.push(spawn_camera(
            source,
            coordinator.clone(),
            running.clone(),
            cfg.detection.object_threshold,
        ));
    }

    log::info!(
        "threatd running: window={} cooldown={}s policy={:?} stub cameras={}",
        cfg.detection.window_len,
        cfg.alerts.cooldown.as_secs(),
        cfg.alerts.record_policy,
        cfg.stub.cameras.len()
    );

    let mut last_health_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
        if last_health_log.elapsed() >= Duration::from_secs(10) {
            for source in coordinator.sources() {
                if let Some(stats) = coordinator.source_stats(&source) {
                    log::info!(
                        "source {} frames={} buffered={} alerts={}",
                        stats.source,
                        stats.frames_seen,
                        stats.buffered_frames,
                        stats.alerts_fired
                    );
                }
            }
            last_health_log = Instant::now();
        }
    }

    log::info!("threatd stopping");
    coordinator.shutdown();
    for camera in cameras {
        if camera.join().is_err() {
            log::error!("camera thread panicked");
        }
    }
    api_handle.stop()?;
    log::info!("threatd stopped");
    Ok(())
}

fn build_registry(cfg: &ThreatdConfig) -> Result<DetectorRegistry> {
    #[allow(unused_mut)]
    let mut registry = DetectorRegistry::with_builtin();
    #[cfg(feature = "backend-tract")]
    if let Some(model) = &cfg.detection.onnx_model {
        let detector = threat_gate::detect::backends::TractObjectDetector::new(model, 640, 640)?;
        registry.register_object(detector);
        if cfg.detection.object_backend.is_none() {
            registry.set_default_object("tract")?;
        }
        log::info!("tract object detector loaded from {}", model);
    }
    #[cfg(not(feature = "backend-tract"))]
    if cfg.detection.onnx_model.is_some() {
        log::warn!("onnx_model is set but threatd was built without backend-tract; ignoring");
    }
    Ok(registry)
}

fn spawn_camera(
    mut source: SyntheticSource,
    coordinator: Arc<IngestCoordinator>,
    running: Arc<AtomicBool>,
    threshold: f32,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let interval = Duration::from_millis(1000 / u64::from(source.target_fps().max(1)));
        let key = source.source_key().to_string();
        let mut last_health_log = Instant::now();
        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log::error!("camera {} capture failed: {:#}", key, err);
                    break;
                }
            };
            match coordinator.ingest(&key, frame, threshold) {
                Ok(outcome) if outcome.alert_fired => {
                    log::info!("camera {}: {} ({})", key, outcome.danger_label(), outcome.reason);
                }
                Ok(_) => {}
                Err(IngestError::ShuttingDown) => break,
                Err(err) => log::warn!("camera {} frame dropped: {}", key, err),
            }

            if last_health_log.elapsed() >= Duration::from_secs(30) {
                let stats = source.stats();
                log::info!(
                    "stub health={} frames={} url={}",
                    source.is_healthy(),
                    stats.frames_captured,
                    stats.url
                );
                last_health_log = Instant::now();
            }

            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    })
}
