use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{DisabledNotifier, LogNotifier, Notifier, RecordPolicy};
use crate::coordinator::{CoordinatorConfig, DEFAULT_OBJECT_THRESHOLD};
use crate::detect::DEFAULT_SEQUENCE_THRESHOLD;
use crate::frame::{DEFAULT_WINDOW_LEN, MAX_WINDOW_LEN};
use crate::snapshot::DEFAULT_SNAPSHOT_DIR;

const DEFAULT_DB_PATH: &str = "threat.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_STUB_FPS: u32 = 5;
const DEFAULT_STUB_WIDTH: u32 = 160;
const DEFAULT_STUB_HEIGHT: u32 = 120;

#[derive(Debug, Deserialize, Default)]
struct ThreatdConfigFile {
    storage: Option<StorageConfigFile>,
    api: Option<ApiConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertsConfigFile>,
    stub: Option<StubConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    db_path: Option<String>,
    snapshot_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    window_len: Option<usize>,
    object_threshold: Option<f32>,
    sequence_threshold: Option<f32>,
    object_backend: Option<String>,
    sequence_backend: Option<String>,
    onnx_model: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    cooldown_secs: Option<u64>,
    notifier: Option<String>,
    record_policy: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StubConfigFile {
    cameras: Option<Vec<String>>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

/// How fired alerts are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifierKind {
    Log,
    Disabled,
}

impl NotifierKind {
    pub fn build(self) -> Arc<dyn Notifier> {
        match self {
            NotifierKind::Log => Arc::new(LogNotifier),
            NotifierKind::Disabled => Arc::new(DisabledNotifier),
        }
    }
}

impl FromStr for NotifierKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "log" => Ok(NotifierKind::Log),
            "disabled" | "none" => Ok(NotifierKind::Disabled),
            other => Err(anyhow!("notifier must be log or disabled, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreatdConfig {
    pub db_path: String,
    pub snapshot_dir: String,
    pub api_addr: String,
    pub detection: DetectionSettings,
    pub alerts: AlertSettings,
    pub stub: StubSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub window_len: usize,
    pub object_threshold: f32,
    pub sequence_threshold: f32,
    /// Registry names; `None` selects the registry default.
    pub object_backend: Option<String>,
    pub sequence_backend: Option<String>,
    /// ONNX model for the `tract` object detector (feature `backend-tract`).
    pub onnx_model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub notifier: NotifierKind,
    pub record_policy: RecordPolicy,
}

#[derive(Debug, Clone)]
pub struct StubSettings {
    /// Source keys for synthetic cameras; empty disables them.
    pub cameras: Vec<String>,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl ThreatdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("THREAT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ThreatdConfigFile) -> Result<Self> {
        let storage = file.storage.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let stub = file.stub.unwrap_or_default();

        let notifier = match alerts.notifier.as_deref() {
            Some(kind) => kind.parse()?,
            None => NotifierKind::Log,
        };
        let record_policy = match alerts.record_policy.as_deref() {
            Some(policy) => policy.parse()?,
            None => RecordPolicy::default(),
        };

        Ok(Self {
            db_path: storage
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            snapshot_dir: storage
                .snapshot_dir
                .unwrap_or_else(|| DEFAULT_SNAPSHOT_DIR.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            detection: DetectionSettings {
                window_len: detection.window_len.unwrap_or(DEFAULT_WINDOW_LEN),
                object_threshold: detection
                    .object_threshold
                    .unwrap_or(DEFAULT_OBJECT_THRESHOLD),
                sequence_threshold: detection
                    .sequence_threshold
                    .unwrap_or(DEFAULT_SEQUENCE_THRESHOLD),
                object_backend: detection.object_backend,
                sequence_backend: detection.sequence_backend,
                onnx_model: detection.onnx_model,
            },
            alerts: AlertSettings {
                cooldown: Duration::from_secs(alerts.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS)),
                notifier,
                record_policy,
            },
            stub: StubSettings {
                cameras: stub.cameras.unwrap_or_default(),
                fps: stub.fps.unwrap_or(DEFAULT_STUB_FPS),
                width: stub.width.unwrap_or(DEFAULT_STUB_WIDTH),
                height: stub.height.unwrap_or(DEFAULT_STUB_HEIGHT),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("THREAT_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = non_empty_env("THREAT_SNAPSHOT_DIR") {
            self.snapshot_dir = dir;
        }
        if let Some(addr) = non_empty_env("THREAT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(model) = non_empty_env("THREAT_ONNX_MODEL") {
            self.detection.onnx_model = Some(model);
        }
        if let Some(window) = non_empty_env("THREAT_WINDOW_LEN") {
            self.detection.window_len = window
                .parse()
                .map_err(|_| anyhow!("THREAT_WINDOW_LEN must be a positive integer"))?;
        }
        if let Some(cooldown) = non_empty_env("THREAT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("THREAT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alerts.cooldown = Duration::from_secs(seconds);
        }
        if let Some(threshold) = non_empty_env("THREAT_OBJECT_THRESHOLD") {
            self.detection.object_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("THREAT_OBJECT_THRESHOLD must be a number"))?;
        }
        if let Some(threshold) = non_empty_env("THREAT_SEQUENCE_THRESHOLD") {
            self.detection.sequence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("THREAT_SEQUENCE_THRESHOLD must be a number"))?;
        }
        if let Some(kind) = non_empty_env("THREAT_NOTIFIER") {
            self.alerts.notifier = kind.parse()?;
        }
        if let Some(policy) = non_empty_env("THREAT_RECORD_POLICY") {
            self.alerts.record_policy = policy.parse()?;
        }
        if let Ok(cameras) = std::env::var("THREAT_STUB_CAMERAS") {
            self.stub.cameras = split_csv(&cameras);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.detection.window_len == 0 || self.detection.window_len > MAX_WINDOW_LEN {
            return Err(anyhow!(
                "window_len must be within 1..={}, got {}",
                MAX_WINDOW_LEN,
                self.detection.window_len
            ));
        }
        for (name, value) in [
            ("object_threshold", self.detection.object_threshold),
            ("sequence_threshold", self.detection.sequence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within 0..=1, got {}", name, value));
            }
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.snapshot_dir.trim().is_empty() {
            return Err(anyhow!("snapshot_dir must not be empty"));
        }
        for camera in &self.stub.cameras {
            crate::validate_source_key(camera)?;
        }
        self.stub.cameras.sort();
        self.stub.cameras.dedup();
        if self.stub.fps == 0 {
            return Err(anyhow!("stub fps must be greater than zero"));
        }
        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            window_len: self.detection.window_len,
            cooldown: self.alerts.cooldown,
            sequence_threshold: self.detection.sequence_threshold,
            record_policy: self.alerts.record_policy,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ThreatdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
