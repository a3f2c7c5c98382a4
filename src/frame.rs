//! Frames and per-source temporal windows.
//!
//! - `Frame`: immutable RGB8 image with capture metadata. Pixels are shared
//!   read-only, so cloning a frame never copies image data.
//! - `FrameWindow`: bounded ring buffer holding the last N frames of one source.
//!   The sequence classifier only ever sees a window once it holds exactly N frames.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::clock::now_ms;

/// Sequence length expected by the violence classifier.
pub const DEFAULT_WINDOW_LEN: usize = 16;

/// Hard cap on window capacity; bounds per-source memory.
pub const MAX_WINDOW_LEN: usize = 256;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded RGB8 frame.
///
/// The pixel buffer is `width * height * 3` bytes, row-major, no padding.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time, milliseconds since the Unix epoch.
    pub captured_ms: u64,
    source: Option<Arc<str>>,
}

impl Frame {
    /// Build a frame from tightly packed RGB8 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, captured_ms: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected_len = rgb_len(width, height)?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{} frame, received {}",
                expected_len,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            captured_ms,
            source: None,
        })
    }

    /// Tag the frame with the key of the source that produced it.
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(Arc::from(source));
        self
    }

    /// Source key, once the frame has been tagged.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Build a frame stamped with the current wall-clock time.
    pub fn now(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::from_rgb(pixels, width, height, now_ms())
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB triple at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// True when both frames share the same pixel allocation.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("source", &self.source)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_ms", &self.captured_ms)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// FrameWindow: bounded per-source ring buffer
// ----------------------------------------------------------------------------

/// Ordered buffer of the most recent frames for one source.
///
/// - Length never exceeds capacity
/// - Pushing onto a full window evicts the oldest frame
/// - Capacity is fixed at construction
pub struct FrameWindow {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameWindow {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_WINDOW_LEN {
            return Err(anyhow!(
                "window capacity must be within 1..={}, got {}",
                MAX_WINDOW_LEN,
                capacity
            ));
        }
        Ok(Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Push a frame, evicting the oldest one if the window is full.
    pub fn push(&mut self, frame: Frame) -> WindowState<'_> {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        self.state()
    }

    pub fn state(&self) -> WindowState<'_> {
        WindowState { window: self }
    }

    /// Most recently pushed frame.
    pub fn latest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Memory usage estimate for the buffered pixels.
    pub fn memory_bytes(&self) -> usize {
        self.frames.iter().map(Frame::byte_len).sum()
    }
}

/// View of a window right after a push.
pub struct WindowState<'a> {
    window: &'a FrameWindow,
}

impl WindowState<'_> {
    /// The window holds exactly `capacity` frames and can be classified.
    pub fn is_ready(&self) -> bool {
        self.window.frames.len() == self.window.capacity
    }

    pub fn len(&self) -> usize {
        self.window.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.frames.is_empty()
    }

    /// Oldest-first copy of the window contents, only when ready.
    ///
    /// The copy is detached from the window: later pushes do not affect it.
    pub fn snapshot(&self) -> Option<Vec<Frame>> {
        if !self.is_ready() {
            return None;
        }
        Some(self.window.frames.iter().cloned().collect())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(tag: u64) -> Frame {
        Frame::from_rgb(vec![(tag % 256) as u8; 2 * 2 * 3], 2, 2, tag).expect("frame")
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 0).is_err());
        assert!(Frame::from_rgb(vec![], 0, 2, 0).is_err());
    }

    #[test]
    fn frame_pixel_lookup_is_bounds_checked() {
        let mut pixels = vec![0u8; 2 * 2 * 3];
        pixels[9..12].copy_from_slice(&[1, 2, 3]);
        let frame = Frame::from_rgb(pixels, 2, 2, 0).unwrap();

        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn source_tag_survives_clones_without_copying_pixels() {
        let frame = make_test_frame(7);
        assert_eq!(frame.source(), None);

        let tagged = frame.clone().with_source("cam1");
        assert_eq!(tagged.source(), Some("cam1"));
        assert!(tagged.shares_pixels_with(&frame));
        assert_eq!(tagged.clone().source(), Some("cam1"));
    }

    #[test]
    fn window_rejects_invalid_capacity() {
        assert!(FrameWindow::new(0).is_err());
        assert!(FrameWindow::new(MAX_WINDOW_LEN + 1).is_err());
    }

    #[test]
    fn window_never_exceeds_capacity() {
        for capacity in 1..6 {
            let mut window = FrameWindow::new(capacity).unwrap();
            for i in 0..(capacity as u64 * 3) {
                let state = window.push(make_test_frame(i));
                assert!(state.len() <= capacity);
                assert_eq!(state.is_ready(), i + 1 >= capacity as u64);
            }
        }
    }

    #[test]
    fn snapshot_holds_last_frames_oldest_first() {
        let mut window = FrameWindow::new(3).unwrap();
        for i in 0..5 {
            window.push(make_test_frame(i));
        }

        let snapshot = window.state().snapshot().expect("ready");
        let stamps: Vec<u64> = snapshot.iter().map(|f| f.captured_ms).collect();
        assert_eq!(stamps, vec![2, 3, 4]);
        assert_eq!(window.latest().map(|f| f.captured_ms), Some(4));
    }

    #[test]
    fn snapshot_is_detached_from_later_pushes() {
        let mut window = FrameWindow::new(2).unwrap();
        window.push(make_test_frame(1));
        let snapshot = window.push(make_test_frame(2)).snapshot().unwrap();

        window.push(make_test_frame(3));

        let stamps: Vec<u64> = snapshot.iter().map(|f| f.captured_ms).collect();
        assert_eq!(stamps, vec![1, 2]);
    }

    #[test]
    fn snapshot_unavailable_until_full() {
        let mut window = FrameWindow::new(4).unwrap();
        let state = window.push(make_test_frame(0));
        assert!(!state.is_ready());
        assert!(state.snapshot().is_none());
    }

    #[test]
    fn snapshot_shares_pixels_without_copying() {
        let mut window = FrameWindow::new(1).unwrap();
        let frame = make_test_frame(7);
        let snapshot = window.push(frame.clone()).snapshot().unwrap();
        assert!(snapshot[0].shares_pixels_with(&frame));
        assert_eq!(window.memory_bytes(), 12);
    }
}
