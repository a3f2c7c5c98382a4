//! Ingest coordinator.
//!
//! Per frame: window update → object detection → sequence classification (when
//! the window is full) → fusion → cooldown gate → evidence, notification and
//! record. Failures in one source never reach another source.
//!
//! # Concurrency
//!
//! Per-source state (window + gate) sits behind its own `Mutex`, created lazily
//! and kept for the process lifetime. The registry `RwLock` is write-locked only
//! to insert a new source. An ingest holds its source lock for the whole cycle,
//! so frames of one source are processed, and alerts fired, in arrival order.
//! Sources never wait on each other's detector calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;

use crate::alert::{AlertNotice, AlertRecord, Notifier, NotifyOutcome, RecordPolicy};
use crate::clock::{Clock, SystemClock};
use crate::detect::{
    ObjectAdapter, ObjectDetector, SequenceAdapter, SequenceClassifier, SequenceLabel,
    SequenceResult, DEFAULT_SEQUENCE_THRESHOLD,
};
use crate::frame::{Frame, FrameWindow, DEFAULT_WINDOW_LEN, MAX_WINDOW_LEN};
use crate::fusion::{fuse, Reason, Verdict};
use crate::gate::{AlertGate, GateDecision, DEFAULT_COOLDOWN};
use crate::snapshot::SnapshotStore;
use crate::storage::{AlertStore, DEFAULT_QUERY_LIMIT};

/// Default object confidence threshold.
pub const DEFAULT_OBJECT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid source key: {0}")]
    InvalidSource(String),

    #[error("frame tagged for source '{found}' was submitted as '{expected}'")]
    SourceMismatch { expected: String, found: String },

    #[error("object threshold must be within 0..=1, got {0}")]
    InvalidThreshold(f32),

    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error("failed to persist alert record: {0}")]
    Persistence(#[source] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Frames per window; the sequence classifier's input length.
    pub window_len: usize,
    pub cooldown: Duration,
    /// Probability at which a clip is labelled positive.
    pub sequence_threshold: f32,
    pub record_policy: RecordPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            window_len: DEFAULT_WINDOW_LEN,
            cooldown: DEFAULT_COOLDOWN,
            sequence_threshold: DEFAULT_SEQUENCE_THRESHOLD,
            record_policy: RecordPolicy::default(),
        }
    }
}

/// External capabilities the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub object_detector: Arc<dyn ObjectDetector>,
    pub sequence_classifier: Arc<dyn SequenceClassifier>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub notifier: Arc<dyn Notifier>,
    pub alerts: Arc<dyn AlertStore>,
}

/// Result of one `ingest` call.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestOutcome {
    pub source: String,
    pub danger: bool,
    pub reason: Reason,
    pub sequence_label: SequenceLabel,
    /// The gate allowed an alert for this frame.
    pub alert_fired: bool,
    /// Notification outcome, when a danger verdict reached the gate.
    pub notify: Option<NotifyOutcome>,
    /// Id of the appended record, when one was written.
    pub record_id: Option<i64>,
}

impl IngestOutcome {
    /// Coarse status label for host responses.
    pub fn danger_label(&self) -> &'static str {
        if self.danger {
            "Violence/Weapon"
        } else {
            "Safe"
        }
    }
}

struct SourceState {
    window: FrameWindow,
    gate: AlertGate,
    frames_seen: u64,
    alerts_fired: u64,
}

/// Point-in-time view of one source, for health reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub buffered_frames: usize,
    pub frames_seen: u64,
    pub alerts_fired: u64,
}

pub struct IngestCoordinator {
    config: CoordinatorConfig,
    objects: ObjectAdapter,
    sequences: SequenceAdapter,
    snapshots: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    alerts: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
    sources: RwLock<HashMap<String, Arc<Mutex<SourceState>>>>,
    shutting_down: AtomicBool,
}

impl IngestCoordinator {
    pub fn new(config: CoordinatorConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        if config.window_len == 0 || config.window_len > MAX_WINDOW_LEN {
            return Err(anyhow::anyhow!(
                "window_len must be within 1..={}, got {}",
                MAX_WINDOW_LEN,
                config.window_len
            ));
        }
        if !(0.0..=1.0).contains(&config.sequence_threshold) {
            return Err(anyhow::anyhow!(
                "sequence_threshold must be within 0..=1, got {}",
                config.sequence_threshold
            ));
        }

        let objects = ObjectAdapter::new(collaborators.object_detector);
        let sequences = SequenceAdapter::new(
            collaborators.sequence_classifier,
            config.window_len,
            config.sequence_threshold,
        );
        log::info!(
            "ingest coordinator: object={} sequence={} window={} cooldown={}s notifier={} policy={:?}",
            objects.backend_name(),
            sequences.backend_name(),
            config.window_len,
            config.cooldown.as_secs_f32(),
            collaborators.notifier.name(),
            config.record_policy
        );

        Ok(Self {
            config,
            objects,
            sequences,
            snapshots: collaborators.snapshots,
            notifier: collaborators.notifier,
            alerts: collaborators.alerts,
            clock: Arc::new(SystemClock),
            sources: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Replace the time source (tests and replays).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Process one frame for `source`.
    ///
    /// Only a failed record append is reported as an error; detector,
    /// snapshot and notifier failures degrade and are reflected in the outcome.
    pub fn ingest(
        &self,
        source: &str,
        frame: Frame,
        object_threshold: f32,
    ) -> Result<IngestOutcome, IngestError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(IngestError::ShuttingDown);
        }
        crate::validate_source_key(source)
            .map_err(|e| IngestError::InvalidSource(e.to_string()))?;
        if !(0.0..=1.0).contains(&object_threshold) {
            return Err(IngestError::InvalidThreshold(object_threshold));
        }
        let frame = match frame.source() {
            Some(tag) if tag != source => {
                return Err(IngestError::SourceMismatch {
                    expected: source.to_string(),
                    found: tag.to_string(),
                });
            }
            Some(_) => frame,
            None => frame.with_source(source),
        };

        let state = self.source_state(source)?;
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

        let arrived = self.clock.monotonic();
        let timestamp_ms = self.clock.wall_ms();
        state.frames_seen += 1;

        let snapshot = state.window.push(frame.clone()).snapshot();
        let detection = self.objects.score(&frame, object_threshold);
        let sequence = match snapshot {
            Some(frames) => self.sequences.score(&frames),
            None => SequenceResult::insufficient(),
        };
        let verdict = fuse(&detection, &sequence, frame);

        let mut outcome = IngestOutcome {
            source: source.to_string(),
            danger: verdict.danger,
            reason: verdict.reason,
            sequence_label: verdict.sequence.label,
            alert_fired: false,
            notify: None,
            record_id: None,
        };

        if !verdict.danger {
            if self.config.record_policy == RecordPolicy::AllFrames {
                let record = AlertRecord::from_verdict(
                    source,
                    timestamp_ms,
                    &verdict,
                    None,
                    NotifyOutcome::NotAttempted,
                );
                outcome.record_id = Some(self.commit(&record)?);
            }
            return Ok(outcome);
        }

        match state.gate.evaluate(arrived) {
            GateDecision::Allowed => {
                state.alerts_fired += 1;
                outcome.alert_fired = true;
                let record = self.dispatch_alert(source, timestamp_ms, &verdict);
                outcome.notify = Some(record.notify.clone());
                outcome.record_id = Some(self.commit(&record)?);
            }
            GateDecision::Denied { remaining } => {
                log::debug!(
                    "alert suppressed for {} ({}), cooling for another {:.1}s",
                    source,
                    verdict.reason,
                    remaining.as_secs_f32()
                );
                outcome.notify = Some(NotifyOutcome::SkippedCooldown);
                if self.config.record_policy != RecordPolicy::AlertsOnly {
                    let record = AlertRecord::from_verdict(
                        source,
                        timestamp_ms,
                        &verdict,
                        None,
                        NotifyOutcome::SkippedCooldown,
                    );
                    outcome.record_id = Some(self.commit(&record)?);
                }
            }
        }

        Ok(outcome)
    }

    /// Capture evidence and notify. Side-effect failures are folded into the record.
    fn dispatch_alert(&self, source: &str, timestamp_ms: u64, verdict: &Verdict) -> AlertRecord {
        let evidence_id = match self.snapshots.save(source, &verdict.evidence_frame) {
            Ok(id) => Some(id),
            Err(err) => {
                log::warn!("evidence capture failed for {}: {:#}", source, err);
                None
            }
        };

        let notice = AlertNotice {
            source,
            timestamp_ms,
            evidence_id: evidence_id.as_deref(),
            reason: verdict.reason,
        };
        let notify = match self.notifier.notify(&notice) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("notification failed for {}: {:#}", source, err);
                NotifyOutcome::Error(err.to_string())
            }
        };

        log::info!(
            "alert fired: source={} reason={} sequence={} ({:.2}) evidence={} notify={}",
            source,
            verdict.reason,
            verdict.sequence.label,
            verdict.sequence.probability,
            evidence_id.as_deref().unwrap_or("-"),
            notify
        );

        AlertRecord::from_verdict(source, timestamp_ms, verdict, evidence_id, notify)
    }

    fn commit(&self, record: &AlertRecord) -> Result<i64, IngestError> {
        self.alerts.append(record).map_err(|err| {
            log::error!("alert record for {} not persisted: {:#}", record.source, err);
            IngestError::Persistence(err)
        })
    }

    /// Look up or lazily create the state for `source`.
    fn source_state(&self, source: &str) -> Result<Arc<Mutex<SourceState>>, IngestError> {
        {
            let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = sources.get(source) {
                return Ok(state.clone());
            }
        }

        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = sources.get(source) {
            return Ok(state.clone());
        }
        let window = FrameWindow::new(self.config.window_len)
            .map_err(|e| IngestError::InvalidSource(e.to_string()))?;
        let state = Arc::new(Mutex::new(SourceState {
            window,
            gate: AlertGate::new(self.config.cooldown),
            frames_seen: 0,
            alerts_fired: 0,
        }));
        sources.insert(source.to_string(), state.clone());
        log::info!("new source registered: {}", source);
        Ok(state)
    }

    /// Recent records, newest first. A zero limit uses the default page size.
    pub fn list_recent_alerts(&self, limit: usize) -> anyhow::Result<Vec<AlertRecord>> {
        let limit = if limit == 0 { DEFAULT_QUERY_LIMIT } else { limit };
        self.alerts.query(limit)
    }

    /// Encoded evidence image for an alert record.
    pub fn fetch_evidence(&self, evidence_id: &str) -> anyhow::Result<Vec<u8>> {
        self.snapshots.load(evidence_id)
    }

    /// Stop accepting frames. Calls already inside `ingest` run to completion.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            log::info!("ingest coordinator shutting down");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Known source keys, sorted.
    pub fn sources(&self) -> Vec<String> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = sources.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn source_stats(&self, source: &str) -> Option<SourceStats> {
        let state = {
            let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            sources.get(source)?.clone()
        };
        let state: MutexGuard<'_, SourceState> =
            state.lock().unwrap_or_else(PoisonError::into_inner);
        Some(SourceStats {
            source: source.to_string(),
            buffered_frames: state.window.len(),
            frames_seen: state.frames_seen,
            alerts_fired: state.alerts_fired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::DisabledNotifier;
    use crate::clock::ManualClock;
    use crate::detect::{MotionSequenceClassifier, StubObjectDetector};
    use crate::snapshot::InMemorySnapshotStore;
    use crate::storage::InMemoryAlertStore;

    fn coordinator(policy: RecordPolicy) -> (IngestCoordinator, Arc<InMemoryAlertStore>) {
        let alerts = Arc::new(InMemoryAlertStore::new());
        let collaborators = Collaborators {
            object_detector: Arc::new(StubObjectDetector::new()),
            sequence_classifier: Arc::new(MotionSequenceClassifier::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            notifier: Arc::new(DisabledNotifier),
            alerts: alerts.clone(),
        };
        let config = CoordinatorConfig {
            window_len: 3,
            record_policy: policy,
            ..CoordinatorConfig::default()
        };
        let coordinator = IngestCoordinator::new(config, collaborators)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new(0)));
        (coordinator, alerts)
    }

    fn still_frame() -> Frame {
        Frame::from_rgb(vec![10u8; 8 * 8 * 3], 8, 8, 0).unwrap()
    }

    fn red_frame() -> Frame {
        let pixels = [255u8, 0, 0].repeat(8 * 8);
        Frame::from_rgb(pixels, 8, 8, 0).unwrap()
    }

    #[test]
    fn rejects_bad_configuration() {
        let (_, alerts) = coordinator(RecordPolicy::Danger);
        let collaborators = Collaborators {
            object_detector: Arc::new(StubObjectDetector::new()),
            sequence_classifier: Arc::new(MotionSequenceClassifier::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            notifier: Arc::new(DisabledNotifier),
            alerts,
        };
        let config = CoordinatorConfig {
            window_len: 0,
            ..CoordinatorConfig::default()
        };
        assert!(IngestCoordinator::new(config, collaborators).is_err());
    }

    #[test]
    fn rejects_invalid_inputs() {
        let (coordinator, _) = coordinator(RecordPolicy::Danger);
        assert!(matches!(
            coordinator.ingest("bad key/../", still_frame(), 0.5),
            Err(IngestError::InvalidSource(_))
        ));
        assert!(matches!(
            coordinator.ingest("cam1", still_frame(), 1.5),
            Err(IngestError::InvalidThreshold(_))
        ));
        assert!(coordinator.sources().is_empty());
    }

    #[test]
    fn safe_frames_are_not_recorded_by_default() {
        let (coordinator, alerts) = coordinator(RecordPolicy::Danger);
        for _ in 0..5 {
            let outcome = coordinator.ingest("cam1", still_frame(), 0.5).unwrap();
            assert!(!outcome.danger);
            assert_eq!(outcome.danger_label(), "Safe");
        }
        assert!(alerts.is_empty());
        assert_eq!(
            coordinator.source_stats("cam1"),
            Some(SourceStats {
                source: "cam1".to_string(),
                buffered_frames: 3,
                frames_seen: 5,
                alerts_fired: 0,
            })
        );
    }

    #[test]
    fn all_frames_policy_records_safe_frames() {
        let (coordinator, alerts) = coordinator(RecordPolicy::AllFrames);
        let outcome = coordinator.ingest("cam1", still_frame(), 0.5).unwrap();
        assert!(outcome.record_id.is_some());
        assert_eq!(alerts.records()[0].notify, NotifyOutcome::NotAttempted);
    }

    #[test]
    fn alerts_only_policy_skips_denied_records() {
        let (coordinator, alerts) = coordinator(RecordPolicy::AlertsOnly);
        let first = coordinator.ingest("cam1", red_frame(), 0.5).unwrap();
        let second = coordinator.ingest("cam1", red_frame(), 0.5).unwrap();

        assert!(first.alert_fired);
        assert_eq!(first.notify, Some(NotifyOutcome::Disabled));
        assert!(!second.alert_fired);
        assert_eq!(second.notify, Some(NotifyOutcome::SkippedCooldown));
        assert_eq!(second.record_id, None);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn frames_are_tagged_and_checked_against_the_source_key() {
        let (coordinator, alerts) = coordinator(RecordPolicy::Danger);

        assert!(matches!(
            coordinator.ingest("cam1", red_frame().with_source("cam2"), 0.5),
            Err(IngestError::SourceMismatch { .. })
        ));
        assert!(coordinator.sources().is_empty());

        coordinator
            .ingest("cam1", red_frame().with_source("cam1"), 0.5)
            .unwrap();
        coordinator.ingest("cam1", still_frame(), 0.5).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(coordinator.source_stats("cam1").unwrap().frames_seen, 2);
    }

    #[test]
    fn shutdown_rejects_new_frames() {
        let (coordinator, _) = coordinator(RecordPolicy::Danger);
        coordinator.shutdown();
        assert!(coordinator.is_shutting_down());
        assert!(matches!(
            coordinator.ingest("cam1", still_frame(), 0.5),
            Err(IngestError::ShuttingDown)
        ));
    }
}
