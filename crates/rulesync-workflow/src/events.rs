// events.rs — Lifecycle events and notification dispatch.
//
// The workflow emits an event on every state change and at the points a
// reviewer or operator cares about (insecure rule removed, rules published,
// verification failed). Sinks decide what to do with them; the JSONL log
// sink is the built-in one.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::TargetId;
use crate::error::ReconcileError;
use crate::state::ReconciliationState;

/// Events emitted during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ReconcileEvent {
    /// The workflow changed state.
    StateChanged {
        attempt_id: Uuid,
        target: TargetId,
        from_state: String,
        to_state: String,
        timestamp: DateTime<Utc>,
    },

    /// The insecure catch-all rule was stripped from the merged document.
    InsecureRuleRemoved {
        attempt_id: Uuid,
        target: TargetId,
        timestamp: DateTime<Utc>,
    },

    /// The remote store accepted the merged document.
    PolicyPublished {
        attempt_id: Uuid,
        target: TargetId,
        bytes: usize,
        timestamp: DateTime<Utc>,
    },

    /// Live rules did not contain the required fragments.
    VerificationFailed {
        attempt_id: Uuid,
        target: TargetId,
        missing: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ReconcileEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            ReconcileEvent::StateChanged { .. } => "state_changed",
            ReconcileEvent::InsecureRuleRemoved { .. } => "insecure_rule_removed",
            ReconcileEvent::PolicyPublished { .. } => "policy_published",
            ReconcileEvent::VerificationFailed { .. } => "verification_failed",
        }
    }

    pub fn state_changed(
        attempt_id: Uuid,
        target: &TargetId,
        from: &ReconciliationState,
        to: &ReconciliationState,
    ) -> Self {
        ReconcileEvent::StateChanged {
            attempt_id,
            target: target.clone(),
            from_state: from.to_string(),
            to_state: to.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives workflow events.
pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the workflow.
    fn send(&self, event: &ReconcileEvent) -> Result<(), ReconcileError>;
}

/// Appends events as JSONL to a file.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &ReconcileEvent) -> Result<(), ReconcileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ReconcileError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ReconcileError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| ReconcileError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Dispatches events to every registered sink.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, event: &ReconcileEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(
                    event_type = event.event_type(),
                    error = %e,
                    "notification sink failed"
                );
            }
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl NotificationSink for Collect {
        fn send(&self, event: &ReconcileEvent) -> Result<(), ReconcileError> {
            self.0.lock().unwrap().push(event.event_type().to_string());
            Ok(())
        }
    }

    struct Broken;

    impl NotificationSink for Broken {
        fn send(&self, _event: &ReconcileEvent) -> Result<(), ReconcileError> {
            Err(ReconcileError::IoError {
                path: "/dev/null".to_string(),
                source: std::io::Error::other("nope"),
            })
        }
    }

    fn sample() -> ReconcileEvent {
        ReconcileEvent::state_changed(
            Uuid::new_v4(),
            &TargetId::new("demo"),
            &ReconciliationState::Unknown,
            &ReconciliationState::Fetching,
        )
    }

    #[test]
    fn log_sink_appends_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let sink = LogSink::new(&path);
        sink.send(&sample()).unwrap();
        sink.send(&sample()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: ReconcileEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.event_type(), "state_changed");
        assert!(lines[0].contains("\"to_state\":\"fetching\""));
    }

    #[test]
    fn broken_sink_does_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(Broken));
        dispatcher.add_sink(Box::new(Collect(seen.clone())));
        dispatcher.dispatch(&sample());
        assert_eq!(dispatcher.sink_count(), 2);
        assert_eq!(seen.lock().unwrap().as_slice(), ["state_changed"]);
    }
}
