//! Frame sources feeding the coordinator.
//!
//! Real camera ingestion (RTSP, V4L2, uploads) belongs to the host; this module
//! ships the synthetic `stub://` source used by `threatd` demos and tests.

pub mod synthetic;

pub use synthetic::{SyntheticConfig, SyntheticSource, SyntheticStats};
