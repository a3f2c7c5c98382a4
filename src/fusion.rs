//! Decision-level fusion of the two detectors.
//!
//! Danger is the logical OR of the object flag and a positive sequence label.
//! The two confidences are never blended: box confidence and clip probability
//! do not share a scale.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detect::{DetectionResult, SequenceLabel, SequenceResult};
use crate::frame::Frame;

/// Which detector(s) contributed to a verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    #[serde(rename = "object+sequence")]
    ObjectAndSequence,
    #[serde(rename = "object-only")]
    ObjectOnly,
    #[serde(rename = "sequence-only")]
    SequenceOnly,
    #[serde(rename = "none")]
    None,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::ObjectAndSequence => "object+sequence",
            Reason::ObjectOnly => "object-only",
            Reason::SequenceOnly => "sequence-only",
            Reason::None => "none",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fused decision for one frame.
#[derive(Clone, Debug)]
pub struct Verdict {
    pub danger: bool,
    pub reason: Reason,
    pub object_flagged: bool,
    pub object_boxes: usize,
    pub sequence: SequenceResult,
    /// The most recently ingested frame.
    pub evidence_frame: Frame,
}

/// Combine an instantaneous detection and a windowed classification.
///
/// An `Insufficient` sequence contributes nothing; it is not a negative vote.
pub fn fuse(detection: &DetectionResult, sequence: &SequenceResult, evidence_frame: Frame) -> Verdict {
    let object = detection.object_flagged;
    let sequence_positive = match sequence.label {
        SequenceLabel::Insufficient => false,
        SequenceLabel::Positive => true,
        SequenceLabel::Negative => false,
    };

    let reason = match (object, sequence_positive) {
        (true, true) => Reason::ObjectAndSequence,
        (true, false) => Reason::ObjectOnly,
        (false, true) => Reason::SequenceOnly,
        (false, false) => Reason::None,
    };

    Verdict {
        danger: object || sequence_positive,
        reason,
        object_flagged: object,
        object_boxes: detection.boxes.len(),
        sequence: *sequence,
        evidence_frame,
    }
}
