use anyhow::Result;

use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// Object (weapon) detector capability.
///
/// Implementations are treated as opaque, potentially slow, synchronous calls.
/// They must be read-only with respect to coordinator state and safe to call
/// concurrently from different sources; backends that keep state use interior
/// mutability.
pub trait ObjectDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Candidate boxes for the target object class.
    ///
    /// `threshold` may be used to prefilter; the adapter re-applies it, so
    /// backends are free to return lower-confidence candidates.
    /// An `Err` means the model could not be invoked.
    fn detect(&self, frame: &Frame, threshold: f32) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Sequence (violence/action) classifier capability.
pub trait SequenceClassifier: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Raw probability that the clip shows the target action.
    ///
    /// `frames` are oldest-first and always exactly one window long.
    fn classify(&self, frames: &[Frame]) -> Result<f32>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
