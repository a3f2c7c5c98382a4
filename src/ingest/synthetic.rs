//! Synthetic frame source (`stub://<source>`).
//!
//! Produces a static background with a periodic "intruder": a red block that
//! moves across the scene for a few frames. The stub object detector flags the
//! red block and the motion classifier sees the movement, so a synthetic feed
//! exercises the whole pipeline without cameras or models.

use anyhow::{anyhow, Result};

use crate::clock::now_ms;
use crate::frame::Frame;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// `stub://<source key>`
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Frames between intruder appearances.
    pub intruder_period: u64,
    /// Frames the intruder stays in view.
    pub intruder_frames: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera_01".to_string(),
            target_fps: 5,
            width: 160,
            height: 120,
            intruder_period: 100,
            intruder_frames: 20,
        }
    }
}

/// Statistics for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticStats {
    pub frames_captured: u64,
    pub url: String,
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    source_key: String,
    frame_count: u64,
    background: Vec<u8>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        let source_key = config
            .url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source url must start with stub://"))?
            .to_string();
        crate::validate_source_key(&source_key)?;
        if config.width < 8 || config.height < 8 {
            return Err(anyhow!("synthetic frames must be at least 8x8"));
        }
        if config.intruder_period == 0 || config.intruder_frames > config.intruder_period {
            return Err(anyhow!(
                "intruder_frames must not exceed a non-zero intruder_period"
            ));
        }

        let background = background_pixels(config.width, config.height);
        log::info!("SyntheticSource: connected to {}", config.url);
        Ok(Self {
            config,
            source_key,
            frame_count: 0,
            background,
        })
    }

    /// Source key derived from the `stub://` url.
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn target_fps(&self) -> u32 {
        self.config.target_fps
    }

    /// Capture the next frame, stamped with the current wall-clock time.
    pub fn next_frame(&mut self) -> Result<Frame> {
        self.next_frame_at(now_ms())
    }

    /// Capture the next frame with an explicit capture time.
    pub fn next_frame_at(&mut self, captured_ms: u64) -> Result<Frame> {
        let phase = self.frame_count % self.config.intruder_period;
        let start = self.config.intruder_period - self.config.intruder_frames;
        self.frame_count += 1;

        let mut pixels = self.background.clone();
        if phase >= start {
            self.draw_intruder(&mut pixels, phase - start);
        }
        Ok(
            Frame::from_rgb(pixels, self.config.width, self.config.height, captured_ms)?
                .with_source(&self.source_key),
        )
    }

    /// True when the most recently captured frame contained the intruder.
    pub fn intruder_visible(&self) -> bool {
        if self.frame_count == 0 {
            return false;
        }
        let phase = (self.frame_count - 1) % self.config.intruder_period;
        phase >= self.config.intruder_period - self.config.intruder_frames
    }

    fn draw_intruder(&self, pixels: &mut [u8], step: u64) {
        let (w, h) = (self.config.width as u64, self.config.height as u64);
        let size = (w.min(h) / 4).max(2);
        let span = w.saturating_sub(size).max(1);
        let x0 = (step * 4) % span;
        let y0 = (h - size) / 2;
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let idx = ((y * w + x) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&[230, 20, 20]);
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        true
    }

    pub fn stats(&self) -> SyntheticStats {
        SyntheticStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

/// Static grey-blue gradient; never trips the stub detector.
fn background_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let shade = (((x + y) * 96) / (width + height)) as u8;
            pixels.extend_from_slice(&[40 + shade / 2, 50 + shade / 2, 60 + shade]);
        }
    }
    pixels
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
