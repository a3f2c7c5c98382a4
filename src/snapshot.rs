//! Evidence snapshots.
//!
//! A snapshot is the triggering frame encoded as PNG. Evidence ids double as
//! file names, so `load` only accepts ids in the shape `save` produces.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use rand::RngCore;
use regex::Regex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::frame::Frame;

/// Default directory for evidence snapshots.
pub const DEFAULT_SNAPSHOT_DIR: &str = "temp_snapshots";

/// Evidence persistence capability.
pub trait SnapshotStore: Send + Sync {
    /// Persist the frame and return its evidence id.
    fn save(&self, source: &str, frame: &Frame) -> Result<String>;

    /// Encoded image bytes for a previously saved evidence id.
    fn load(&self, evidence_id: &str) -> Result<Vec<u8>>;
}

/// Encode an RGB frame as PNG.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>> {
    let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("png encoding failed")?;
    Ok(out.into_inner())
}

/// New evidence id: `alert_<source>_<captured_ms>_<nonce>.png`.
fn new_evidence_id(source: &str, frame: &Frame) -> String {
    let safe_source: String = source
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut nonce = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut nonce);
    format!(
        "alert_{}_{}_{}.png",
        safe_source,
        frame.captured_ms,
        hex::encode(nonce)
    )
}

/// Reject ids that could escape the snapshot directory.
pub fn validate_evidence_id(evidence_id: &str) -> Result<()> {
    static EVIDENCE_ID_RE: OnceLock<Regex> = OnceLock::new();
    let re = EVIDENCE_ID_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]{1,160}\.png$").expect("evidence id pattern")
    });
    if !re.is_match(evidence_id) {
        return Err(anyhow!("invalid evidence id"));
    }
    Ok(())
}

// -------------------- Filesystem Store --------------------

pub struct FilesystemSnapshotStore {
    root: PathBuf,
}

impl FilesystemSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create snapshot dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SnapshotStore for FilesystemSnapshotStore {
    fn save(&self, source: &str, frame: &Frame) -> Result<String> {
        let evidence_id = new_evidence_id(source, frame);
        let path = self.root.join(&evidence_id);
        if path.exists() {
            return Err(anyhow!("snapshot {} already exists", evidence_id));
        }
        let encoded = encode_png(frame)?;
        write_atomic(&path, &encoded)?;
        Ok(evidence_id)
    }

    fn load(&self, evidence_id: &str) -> Result<Vec<u8>> {
        validate_evidence_id(evidence_id)?;
        let path = self.root.join(evidence_id);
        fs::read(&path).with_context(|| format!("snapshot {} not found", evidence_id))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let written = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp_path, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

// -------------------- In-Memory Store --------------------

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, source: &str, frame: &Frame) -> Result<String> {
        let evidence_id = new_evidence_id(source, frame);
        let encoded = encode_png(frame)?;
        self.snapshots
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?
            .insert(evidence_id.clone(), encoded);
        Ok(evidence_id)
    }

    fn load(&self, evidence_id: &str) -> Result<Vec<u8>> {
        validate_evidence_id(evidence_id)?;
        self.snapshots
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?
            .get(evidence_id)
            .cloned()
            .ok_or_else(|| anyhow!("snapshot {} not found", evidence_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        let mut pixels = vec![0u8; 4 * 3 * 3];
        pixels[0..3].copy_from_slice(&[255, 0, 0]);
        Frame::from_rgb(pixels, 4, 3, 1_700_000_000_000).unwrap()
    }

    #[test]
    fn failed_write_leaves_no_temp_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("x.png");
        fs::create_dir(&target)?;
        fs::write(target.join("occupied"), b"keep")?;

        assert!(write_atomic(&target, b"data").is_err());
        assert!(!dir.path().join("x.tmp").exists());
        assert!(target.join("occupied").exists());
        Ok(())
    }

    #[test]
    fn filesystem_store_writes_png_under_root() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FilesystemSnapshotStore::new(dir.path().join("snapshots"))?;

        let id = store.save("zone:front gate", &frame())?;
        assert!(id.starts_with("alert_zone_front_gate_1700000000000_"));
        assert!(id.ends_with(".png"));

        let entries: Vec<_> = fs::read_dir(store.root())?.collect::<Result<_, _>>()?;
        assert_eq!(entries.len(), 1);

        let bytes = store.load(&id)?;
        let decoded = image::load_from_memory(&bytes)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0]);
        Ok(())
    }

    #[test]
    fn load_rejects_path_traversal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FilesystemSnapshotStore::new(dir.path())?;

        assert!(store.load("../secrets.png").is_err());
        assert!(store.load("alert.png/../../x.png").is_err());
        assert!(store.load("alert_missing.png").is_err());
        Ok(())
    }

    #[test]
    fn in_memory_store_round_trips() -> Result<()> {
        let store = InMemorySnapshotStore::new();
        let id = store.save("cam1", &frame())?;
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(&id)?, encode_png(&frame())?);
        Ok(())
    }
}
