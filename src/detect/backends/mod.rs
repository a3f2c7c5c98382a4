pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::MotionSequenceClassifier;
pub use stub::StubObjectDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractObjectDetector;
