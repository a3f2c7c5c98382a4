//! Threat Gate
//!
//! Stream fusion and alert gating for multi-camera threat detection.
//!
//! # Architecture
//!
//! Each frame flows one way through the pipeline:
//!
//! 1. **Window**: the frame joins its source's bounded `FrameWindow`.
//! 2. **Detect**: the object detector scores the frame; the sequence classifier
//!    scores the window once it is full.
//! 3. **Fuse**: a danger verdict is the OR of both detectors (`fusion`).
//! 4. **Gate**: a per-source cooldown decides whether a danger verdict may alert.
//! 5. **Dispatch**: evidence snapshot, notification, append-only alert record.
//!
//! # Module Structure
//!
//! - `frame`: frames and per-source windows
//! - `detect`: detector capabilities, adapters, bundled backends
//! - `fusion`, `gate`: pure decision logic
//! - `coordinator`: the orchestrating `IngestCoordinator`
//! - `alert`, `snapshot`, `storage`: records, evidence, notification and persistence
//! - `api`, `config`, `ingest`: host surface, configuration, synthetic sources

use anyhow::{anyhow, Result};
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::sync::OnceLock;

pub mod alert;
pub mod api;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod detect;
pub mod frame;
pub mod fusion;
pub mod gate;
pub mod ingest;
pub mod snapshot;
pub mod storage;

pub use alert::{
    AlertNotice, AlertRecord, DisabledNotifier, LogNotifier, Notifier, NotifyOutcome, RecordPolicy,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{
    Collaborators, CoordinatorConfig, IngestCoordinator, IngestError, IngestOutcome, SourceStats,
    DEFAULT_OBJECT_THRESHOLD,
};
pub use detect::{
    BoundingBox, DetectionResult, DetectorRegistry, MotionSequenceClassifier, ObjectDetector,
    SequenceClassifier, SequenceLabel, SequenceResult, StubObjectDetector,
};
pub use frame::{Frame, FrameWindow, WindowState, DEFAULT_WINDOW_LEN, MAX_WINDOW_LEN};
pub use fusion::{fuse, Reason, Verdict};
pub use gate::{AlertGate, GateDecision, DEFAULT_COOLDOWN};
pub use ingest::{SyntheticConfig, SyntheticSource};
pub use snapshot::{FilesystemSnapshotStore, InMemorySnapshotStore, SnapshotStore};
pub use storage::{AlertStore, InMemoryAlertStore, SqliteAlertStore};

/// Fresh shared-cache in-memory SQLite URI (tests, ephemeral runs).
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:threat_gate_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

// -------------------- Source Key Discipline --------------------

/// A source key names one camera/stream. It is used as a map key, in log
/// lines and in evidence file names.
///
/// Allowed: "camera_01", "cam1", "lobby:north", "dock-3.east"
/// Disallowed: empty, longer than 64 characters, whitespace, slashes.
pub fn validate_source_key(source: &str) -> Result<()> {
    static SOURCE_KEY_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SOURCE_KEY_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.:-]{1,64}$").expect("source key pattern"));

    if !re.is_match(source) || source.contains("..") {
        return Err(anyhow!(
            "source key must match ^[A-Za-z0-9_.:-]{{1,64}}$ without '..', got '{}'",
            source
        ));
    }
    Ok(())
}
