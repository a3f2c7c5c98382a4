use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// Per-frame object detection, normalized by `ObjectAdapter`.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    /// At least one box met the confidence threshold.
    pub object_flagged: bool,
    /// Boxes at or above the threshold.
    pub boxes: Vec<BoundingBox>,
    /// Threshold the boxes were filtered with.
    pub threshold: f32,
}

impl DetectionResult {
    /// "No detection" result, used when the detector is unavailable.
    pub fn none(threshold: f32) -> Self {
        Self {
            object_flagged: false,
            boxes: Vec::new(),
            threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceLabel {
    Positive,
    Negative,
    /// Window not yet full, or the classifier could not produce a score.
    /// Never equivalent to a confident negative.
    Insufficient,
}

impl SequenceLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceLabel::Positive => "positive",
            SequenceLabel::Negative => "negative",
            SequenceLabel::Insufficient => "insufficient",
        }
    }
}

impl fmt::Display for SequenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Windowed classification, normalized by `SequenceAdapter`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequenceResult {
    pub label: SequenceLabel,
    /// Probability in `[0, 1]`; zero when insufficient.
    pub probability: f32,
}

impl SequenceResult {
    pub fn insufficient() -> Self {
        Self {
            label: SequenceLabel::Insufficient,
            probability: 0.0,
        }
    }

    /// Label a raw probability against a positive threshold.
    ///
    /// Non-finite probabilities are treated as insufficient; finite ones are
    /// clamped into `[0, 1]`.
    pub fn from_probability(probability: f32, positive_threshold: f32) -> Self {
        if !probability.is_finite() {
            return Self::insufficient();
        }
        let probability = probability.clamp(0.0, 1.0);
        let label = if probability >= positive_threshold {
            SequenceLabel::Positive
        } else {
            SequenceLabel::Negative
        };
        Self { label, probability }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_is_labelled_and_clamped() {
        let r = SequenceResult::from_probability(0.9, 0.5);
        assert_eq!(r.label, SequenceLabel::Positive);

        let r = SequenceResult::from_probability(0.5, 0.5);
        assert_eq!(r.label, SequenceLabel::Positive);

        let r = SequenceResult::from_probability(-0.2, 0.5);
        assert_eq!(r.label, SequenceLabel::Negative);
        assert_eq!(r.probability, 0.0);

        let r = SequenceResult::from_probability(1.7, 0.5);
        assert_eq!(r.probability, 1.0);
    }

    #[test]
    fn non_finite_probability_is_insufficient() {
        assert_eq!(
            SequenceResult::from_probability(f32::NAN, 0.5).label,
            SequenceLabel::Insufficient
        );
    }

    #[test]
    fn labels_serialize_lowercase() {
        let json = serde_json::to_string(&SequenceLabel::Insufficient).unwrap();
        assert_eq!(json, "\"insufficient\"");
    }
}
