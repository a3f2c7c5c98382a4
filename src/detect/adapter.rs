//! Invocation wrappers around the detector capabilities.
//!
//! Adapters normalize backend output into `DetectionResult` / `SequenceResult`
//! and absorb backend failures: an unavailable object detector degrades to
//! "no detection", an unavailable classifier degrades to `Insufficient`.
//! Ingest never blocks on a detector outage.

use anyhow::{anyhow, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::detect::backend::{ObjectDetector, SequenceClassifier};
use crate::detect::result::{DetectionResult, SequenceResult};
use crate::frame::Frame;

/// Default probability at which a clip is labelled positive.
pub const DEFAULT_SEQUENCE_THRESHOLD: f32 = 0.5;

#[derive(Clone)]
pub struct ObjectAdapter {
    detector: Arc<dyn ObjectDetector>,
}

impl ObjectAdapter {
    pub fn new(detector: Arc<dyn ObjectDetector>) -> Self {
        Self { detector }
    }

    pub fn backend_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Score a single frame. Never fails.
    pub fn score(&self, frame: &Frame, threshold: f32) -> DetectionResult {
        let detector = &self.detector;
        match guarded(|| detector.detect(frame, threshold)) {
            Ok(candidates) => {
                let boxes: Vec<_> = candidates
                    .into_iter()
                    .filter(|b| b.confidence.is_finite() && b.confidence >= threshold)
                    .collect();
                DetectionResult {
                    object_flagged: !boxes.is_empty(),
                    boxes,
                    threshold,
                }
            }
            Err(err) => {
                log::warn!(
                    "object detector '{}' unavailable, treating frame as clear: {}",
                    detector.name(),
                    err
                );
                DetectionResult::none(threshold)
            }
        }
    }
}

#[derive(Clone)]
pub struct SequenceAdapter {
    classifier: Arc<dyn SequenceClassifier>,
    window_len: usize,
    positive_threshold: f32,
}

impl SequenceAdapter {
    pub fn new(
        classifier: Arc<dyn SequenceClassifier>,
        window_len: usize,
        positive_threshold: f32,
    ) -> Self {
        Self {
            classifier,
            window_len,
            positive_threshold,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Classify an ordered window. Never fails.
    ///
    /// Anything other than exactly one full window is `Insufficient`.
    pub fn score(&self, frames: &[Frame]) -> SequenceResult {
        if frames.len() != self.window_len {
            log::debug!(
                "sequence classifier skipped: {} of {} frames",
                frames.len(),
                self.window_len
            );
            return SequenceResult::insufficient();
        }
        let classifier = &self.classifier;
        match guarded(|| classifier.classify(frames)) {
            Ok(probability) => {
                let result = SequenceResult::from_probability(probability, self.positive_threshold);
                if !probability.is_finite() {
                    log::warn!(
                        "sequence classifier '{}' returned non-finite probability",
                        classifier.name()
                    );
                }
                result
            }
            Err(err) => {
                log::warn!(
                    "sequence classifier '{}' unavailable, window marked insufficient: {}",
                    classifier.name(),
                    err
                );
                SequenceResult::insufficient()
            }
        }
    }
}

/// Run a backend call, converting a panic into an error.
fn guarded<T>(call: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(_) => Err(anyhow!("backend panicked during inference")),
    }
}
