mod adapter;
mod backend;
pub mod backends;
mod registry;
mod result;

pub use adapter::{ObjectAdapter, SequenceAdapter, DEFAULT_SEQUENCE_THRESHOLD};
pub use backend::{ObjectDetector, SequenceClassifier};
pub use backends::{MotionSequenceClassifier, StubObjectDetector};
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, DetectionResult, SequenceLabel, SequenceResult};
