// store.rs — Persistence for reconciliation snapshots.
//
// Each target's latest snapshot is stored as `<store_dir>/<target>.json`,
// so a document waiting for review survives a restart or the operator
// walking away and coming back later.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rulesync_policy::{FragmentSelection, MergedPolicyDocument, RawPolicyDocument};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::TargetId;
use crate::error::ReconcileError;
use crate::state::ReconciliationState;

/// Everything needed to pick an attempt up again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSnapshot {
    pub attempt_id: Uuid,
    pub target: TargetId,
    pub state: ReconciliationState,
    pub selection: FragmentSelection,

    /// The rules fetched for this attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawPolicyDocument>,

    /// The merge of `raw` under `selection`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<MergedPolicyDocument>,

    pub updated_at: DateTime<Utc>,
}

impl ReconciliationSnapshot {
    pub fn new(target: TargetId, selection: FragmentSelection) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            target,
            state: ReconciliationState::Unknown,
            selection,
            raw: None,
            merged: None,
            updated_at: Utc::now(),
        }
    }

    /// Map states that only exist while a call is running to the state a
    /// reloaded snapshot must resume from.
    ///
    /// An interrupted fetch left nothing usable. An interrupted publish may
    /// have reached the remote side, so it is confirmed by verification
    /// rather than assumed to have failed.
    pub fn settle(mut self) -> Self {
        match self.state {
            ReconciliationState::Fetching => {
                self.state = ReconciliationState::Unknown;
                self.raw = None;
                self.merged = None;
            }
            ReconciliationState::Publishing => {
                self.state = ReconciliationState::Verifying;
            }
            _ => {}
        }
        self
    }
}

/// One JSON file per target.
#[derive(Debug, Clone)]
pub struct ReconciliationStore {
    store_dir: PathBuf,
}

impl ReconciliationStore {
    /// Create a store backed by the given directory, creating it if needed.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self, ReconcileError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        fs::create_dir_all(&store_dir).map_err(|source| ReconcileError::IoError {
            path: store_dir.display().to_string(),
            source,
        })?;
        Ok(Self { store_dir })
    }

    /// Save a snapshot (creates or overwrites).
    pub fn save(&self, snapshot: &ReconciliationSnapshot) -> Result<(), ReconcileError> {
        let path = self.snapshot_file(&snapshot.target);
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, json).map_err(|source| ReconcileError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Latest snapshot for a target.
    pub fn load(&self, target: &TargetId) -> Result<Option<ReconciliationSnapshot>, ReconcileError> {
        let path = self.snapshot_file(target);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|source| ReconcileError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// All stored snapshots, most recently updated first. Unreadable files
    /// are skipped.
    pub fn list(&self) -> Result<Vec<ReconciliationSnapshot>, ReconcileError> {
        let entries = fs::read_dir(&self.store_dir).map_err(|source| ReconcileError::IoError {
            path: self.store_dir.display().to_string(),
            source,
        })?;

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ReconcileError::IoError {
                path: self.store_dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let Ok(json) = fs::read_to_string(&path) else {
                    continue;
                };
                match serde_json::from_str::<ReconciliationSnapshot>(&json) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
                }
            }
        }

        snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(snapshots)
    }

    /// Delete a target's snapshot. Returns whether one existed.
    pub fn delete(&self, target: &TargetId) -> Result<bool, ReconcileError> {
        let path = self.snapshot_file(target);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| ReconcileError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Ok(true)
    }

    fn snapshot_file(&self, target: &TargetId) -> PathBuf {
        let name: String = target
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.store_dir.join(format!("{name}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulesync_policy::PolicyMerger;
    use tempfile::tempdir;

    fn ready_snapshot(target: &str) -> ReconciliationSnapshot {
        let raw = RawPolicyDocument::new("");
        let merged = PolicyMerger::default()
            .merge(&raw, FragmentSelection::default())
            .unwrap();
        let mut snapshot = ReconciliationSnapshot::new(TargetId::new(target), FragmentSelection::default());
        snapshot.state = ReconciliationState::ReadyForReview;
        snapshot.raw = Some(raw);
        snapshot.merged = Some(merged);
        snapshot
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let store = ReconciliationStore::new(dir.path().join("state")).unwrap();
        let snapshot = ready_snapshot("demo-project");
        store.save(&snapshot).unwrap();

        let loaded = store.load(&snapshot.target).unwrap().unwrap();
        assert_eq!(loaded.attempt_id, snapshot.attempt_id);
        assert_eq!(loaded.state, ReconciliationState::ReadyForReview);
        assert_eq!(loaded.merged, snapshot.merged);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = ReconciliationStore::new(dir.path()).unwrap();
        assert!(store.load(&TargetId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn list_and_delete() {
        let dir = tempdir().unwrap();
        let store = ReconciliationStore::new(dir.path()).unwrap();
        store.save(&ready_snapshot("a")).unwrap();
        store.save(&ready_snapshot("b")).unwrap();
        fs::write(dir.path().join("junk.json"), "{not json").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        assert!(store.delete(&TargetId::new("a")).unwrap());
        assert!(!store.delete(&TargetId::new("a")).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn target_names_are_sanitized() {
        let dir = tempdir().unwrap();
        let store = ReconciliationStore::new(dir.path()).unwrap();
        store.save(&ready_snapshot("../evil/project")).unwrap();
        assert!(dir.path().join("___evil_project.json").exists());
    }

    #[test]
    fn settle_interrupted_states() {
        let mut fetching = ready_snapshot("a");
        fetching.state = ReconciliationState::Fetching;
        let settled = fetching.settle();
        assert_eq!(settled.state, ReconciliationState::Unknown);
        assert!(settled.merged.is_none());

        let mut publishing = ready_snapshot("a");
        publishing.state = ReconciliationState::Publishing;
        let settled = publishing.settle();
        assert_eq!(settled.state, ReconciliationState::Verifying);
        assert!(settled.merged.is_some());
    }
}
