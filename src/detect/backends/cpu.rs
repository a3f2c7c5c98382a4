use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::detect::backend::SequenceClassifier;
use crate::frame::Frame;

/// CPU sequence classifier based on frame-to-frame change.
///
/// Hashes every frame of the window and reports the fraction of consecutive
/// pairs whose content changed. A static scene scores 0.0, continuous activity
/// scores 1.0.
#[derive(Default)]
pub struct MotionSequenceClassifier;

impl MotionSequenceClassifier {
    pub fn new() -> Self {
        Self
    }
}

fn frame_hash(frame: &Frame) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(frame.width.to_le_bytes());
    hasher.update(frame.height.to_le_bytes());
    hasher.update(frame.pixels());
    hasher.finalize().into()
}

impl SequenceClassifier for MotionSequenceClassifier {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn classify(&self, frames: &[Frame]) -> Result<f32> {
        if frames.is_empty() {
            return Err(anyhow!("motion classifier received an empty window"));
        }
        if frames.len() == 1 {
            return Ok(0.0);
        }

        let hashes: Vec<[u8; 32]> = frames.iter().map(frame_hash).collect();
        let changed = hashes.windows(2).filter(|pair| pair[0] != pair[1]).count();

        Ok(changed as f32 / (hashes.len() - 1) as f32)
    }
}
