use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::error::Result;
use crate::snapshot::Snapshot;

/// Session-scoped holder for the single most recent snapshot.
///
/// Exactly one JSON value lives at a well-known path, overwritten wholesale
/// by each completed refresh cycle. The path sits under the user's runtime
/// directory (`$XDG_RUNTIME_DIR` on Linux, cleared at session end), falling
/// back to the OS temp dir where no runtime dir exists:
/// `{runtime-dir}/pipewatch/{workspace}-{repo}.json`.
///
/// A missing or malformed stored value reads as absent, never as an error.
pub struct SnapshotStore {
    snapshot_file: PathBuf,
}

impl SnapshotStore {
    /// Creates a store keyed to one repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the session directory cannot be created.
    pub fn for_repository(workspace: &str, repository: &str) -> Result<Self> {
        let session_dir = dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("pipewatch");

        fs::create_dir_all(&session_dir)?;

        let snapshot_file = session_dir.join(format!("{workspace}-{repository}.json"));
        info!("Snapshot store at: {}", snapshot_file.display());

        Ok(Self::at_path(snapshot_file))
    }

    /// Creates a store at an explicit path. Directories must already exist.
    pub fn at_path(snapshot_file: PathBuf) -> Self {
        Self { snapshot_file }
    }

    /// Loads the stored snapshot, if any.
    ///
    /// Unreadable or malformed contents are logged and treated as absent.
    pub fn load(&self) -> Option<Snapshot> {
        let content = fs::read_to_string(&self.snapshot_file).ok()?;

        match serde_json::from_str(&content) {
            Ok(snapshot) => {
                debug!("Loaded snapshot from: {}", self.snapshot_file.display());
                Some(snapshot)
            }
            Err(e) => {
                warn!("Discarding malformed stored snapshot: {e}");
                None
            }
        }
    }

    /// Serializes and replaces the single stored value.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let content = serde_json::to_string(snapshot)?;
        fs::write(&self.snapshot_file, content)?;

        debug!(
            "Saved snapshot ({} branches) to: {}",
            snapshot.branches.len(),
            self.snapshot_file.display()
        );

        Ok(())
    }

    /// Removes the stored snapshot, if present.
    pub fn clear(&self) -> Result<()> {
        if self.snapshot_file.exists() {
            fs::remove_file(&self.snapshot_file)?;
            info!("Snapshot cleared: {}", self.snapshot_file.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{AggregatedStep, BranchAggregate, StepState};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SnapshotStore {
        SnapshotStore::at_path(dir.path().join("acme-widgets.json"))
    }

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();
        let mut branch = BranchAggregate::new("main".to_string(), 42);
        branch.steps.insert(
            "build".to_string(),
            AggregatedStep {
                name: "build".to_string(),
                state: StepState::Failed,
                origin_pipeline: 40,
            },
        );
        snapshot.branches.insert("main".to_string(), branch);
        snapshot
    }

    #[test]
    fn test_load_before_first_save_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).load().is_none());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save(&sample_snapshot()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.branches["main"].last_pipeline_number, 42);
        assert_eq!(
            loaded.branches["main"].steps["build"].state,
            StepState::Failed
        );
    }

    #[test]
    fn test_save_replaces_previous_value_wholesale() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save(&sample_snapshot()).unwrap();

        let mut replacement = Snapshot::new();
        replacement.branches.insert(
            "develop".to_string(),
            BranchAggregate::new("develop".to_string(), 50),
        );
        store.save(&replacement).unwrap();

        let loaded = store.load().unwrap();
        assert!(!loaded.branches.contains_key("main"));
        assert!(loaded.branches.contains_key("develop"));
    }

    #[test]
    fn test_malformed_stored_value_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme-widgets.json");
        fs::write(&path, "{not json at all").unwrap();

        assert!(SnapshotStore::at_path(path).load().is_none());
    }

    #[test]
    fn test_clear_removes_stored_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save(&sample_snapshot()).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());

        // Clearing an already-empty store is fine.
        store.clear().unwrap();
    }
}
