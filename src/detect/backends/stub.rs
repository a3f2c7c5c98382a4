use anyhow::Result;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// Fraction of "hot" pixels at which the stub reports full confidence.
const DEFAULT_SATURATION_FRACTION: f32 = 0.02;

/// Stub object detector for tests and synthetic feeds.
///
/// Treats strongly red pixels (the synthetic source's intruder marker) as the
/// target object and reports one box around them. Confidence scales with the
/// fraction of hot pixels, saturating at `saturation_fraction`.
pub struct StubObjectDetector {
    saturation_fraction: f32,
}

impl StubObjectDetector {
    pub fn new() -> Self {
        Self {
            saturation_fraction: DEFAULT_SATURATION_FRACTION,
        }
    }

    pub fn with_saturation(mut self, fraction: f32) -> Self {
        self.saturation_fraction = fraction.max(f32::EPSILON);
        self
    }
}

impl Default for StubObjectDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hot(rgb: &[u8]) -> bool {
    rgb[0] >= 200 && rgb[1] <= 80 && rgb[2] <= 80
}

impl ObjectDetector for StubObjectDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, frame: &Frame, _threshold: f32) -> Result<Vec<BoundingBox>> {
        let width = frame.width as usize;
        let mut hot = 0usize;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0usize, 0usize);

        for (idx, rgb) in frame.pixels().chunks_exact(3).enumerate() {
            if !is_hot(rgb) {
                continue;
            }
            hot += 1;
            let (x, y) = (idx % width, idx / width);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if hot == 0 {
            return Ok(Vec::new());
        }

        let total = (frame.width as usize) * (frame.height as usize);
        let fraction = hot as f32 / total as f32;
        let confidence = (fraction / self.saturation_fraction).min(1.0);

        Ok(vec![BoundingBox {
            x1: min_x as f32,
            y1: min_y as f32,
            x2: (max_x + 1) as f32,
            y2: (max_y + 1) as f32,
            confidence,
        }])
    }
}
