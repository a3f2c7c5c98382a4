//! Alert records and the notification capability.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::detect::SequenceLabel;
use crate::fusion::{Reason, Verdict};

// -------------------- Notification Outcome --------------------

/// Result of a notification attempt, persisted with each record.
///
/// Renders as `sent`, `skipped_cooldown`, `disabled`, `none` or `error:<detail>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum NotifyOutcome {
    Sent,
    SkippedCooldown,
    Disabled,
    /// No notification was due (safe frame under `all_frames` recording).
    NotAttempted,
    Error(String),
}

impl fmt::Display for NotifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyOutcome::Sent => f.write_str("sent"),
            NotifyOutcome::SkippedCooldown => f.write_str("skipped_cooldown"),
            NotifyOutcome::Disabled => f.write_str("disabled"),
            NotifyOutcome::NotAttempted => f.write_str("none"),
            NotifyOutcome::Error(detail) => write!(f, "error:{}", detail),
        }
    }
}

impl FromStr for NotifyOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sent" => Ok(NotifyOutcome::Sent),
            "skipped_cooldown" => Ok(NotifyOutcome::SkippedCooldown),
            "disabled" => Ok(NotifyOutcome::Disabled),
            "none" => Ok(NotifyOutcome::NotAttempted),
            other => other
                .strip_prefix("error:")
                .map(|detail| NotifyOutcome::Error(detail.to_string()))
                .ok_or_else(|| anyhow!("unknown notify outcome '{}'", other)),
        }
    }
}

impl From<NotifyOutcome> for String {
    fn from(outcome: NotifyOutcome) -> Self {
        outcome.to_string()
    }
}

impl TryFrom<String> for NotifyOutcome {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

// -------------------- Alert Record --------------------

/// Persisted unit of the alert log. Built once, appended once, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Store-assigned identifier; `None` until appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub source: String,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub danger: bool,
    pub reason: Reason,
    pub object_flagged: bool,
    pub sequence_label: SequenceLabel,
    pub sequence_probability: f32,
    pub evidence_id: Option<String>,
    pub notify: NotifyOutcome,
}

impl AlertRecord {
    pub fn from_verdict(
        source: &str,
        timestamp_ms: u64,
        verdict: &Verdict,
        evidence_id: Option<String>,
        notify: NotifyOutcome,
    ) -> Self {
        Self {
            id: None,
            source: source.to_string(),
            timestamp_ms,
            danger: verdict.danger,
            reason: verdict.reason,
            object_flagged: verdict.object_flagged,
            sequence_label: verdict.sequence.label,
            sequence_probability: verdict.sequence.probability,
            evidence_id,
            notify,
        }
    }

    /// Copy of this record carrying the store-assigned id.
    pub fn with_id(&self, id: i64) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }
}

// -------------------- Record Policy --------------------

/// Which evaluations are appended to the alert store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Only alerts that passed the gate.
    AlertsOnly,
    /// Every danger verdict; denied ones are recorded as `skipped_cooldown`.
    #[default]
    Danger,
    /// Every processed frame, safe ones recorded with outcome `none`.
    AllFrames,
}

impl FromStr for RecordPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "alerts_only" => Ok(RecordPolicy::AlertsOnly),
            "danger" => Ok(RecordPolicy::Danger),
            "all_frames" => Ok(RecordPolicy::AllFrames),
            other => Err(anyhow!(
                "record policy must be alerts_only, danger or all_frames, got '{}'",
                other
            )),
        }
    }
}

// -------------------- Notifier --------------------

/// What a notifier is told about a fired alert.
#[derive(Clone, Debug)]
pub struct AlertNotice<'a> {
    pub source: &'a str,
    pub timestamp_ms: u64,
    pub evidence_id: Option<&'a str>,
    pub reason: Reason,
}

/// Notification delivery capability.
///
/// An `Err` is recorded as `error:<detail>`; it never blocks persistence.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn notify(&self, notice: &AlertNotice<'_>) -> Result<NotifyOutcome>;
}

/// Emits alerts to the process log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, notice: &AlertNotice<'_>) -> Result<NotifyOutcome> {
        log::warn!(
            "ALERT source={} ts_ms={} reason={} evidence={}",
            notice.source,
            notice.timestamp_ms,
            notice.reason,
            notice.evidence_id.unwrap_or("-")
        );
        Ok(NotifyOutcome::Sent)
    }
}

/// Notifier used when delivery is not configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn notify(&self, _notice: &AlertNotice<'_>) -> Result<NotifyOutcome> {
        Ok(NotifyOutcome::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_outcome_renders_and_parses() {
        let cases = [
            (NotifyOutcome::Sent, "sent"),
            (NotifyOutcome::SkippedCooldown, "skipped_cooldown"),
            (NotifyOutcome::Disabled, "disabled"),
            (NotifyOutcome::NotAttempted, "none"),
            (NotifyOutcome::Error("smtp timeout".into()), "error:smtp timeout"),
        ];
        for (outcome, text) in cases {
            assert_eq!(outcome.to_string(), text);
            assert_eq!(text.parse::<NotifyOutcome>().unwrap(), outcome);
        }
        assert!("bounced".parse::<NotifyOutcome>().is_err());
    }

    #[test]
    fn record_serializes_labels_as_strings() {
        let record = AlertRecord {
            id: None,
            source: "cam1".to_string(),
            timestamp_ms: 1_700_000_000_000,
            danger: true,
            reason: Reason::ObjectAndSequence,
            object_flagged: true,
            sequence_label: SequenceLabel::Positive,
            sequence_probability: 0.9,
            evidence_id: Some("alert_cam1.png".to_string()),
            notify: NotifyOutcome::Error("no route".to_string()),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["reason"], "object+sequence");
        assert_eq!(json["notify"], "error:no route");
        assert!(json.get("id").is_none());

        let back: AlertRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_policy_parses_config_values() {
        assert_eq!("danger".parse::<RecordPolicy>().unwrap(), RecordPolicy::Danger);
        assert_eq!(
            "all_frames".parse::<RecordPolicy>().unwrap(),
            RecordPolicy::AllFrames
        );
        assert!("everything".parse::<RecordPolicy>().is_err());
        assert_eq!(RecordPolicy::default(), RecordPolicy::Danger);
    }
}
