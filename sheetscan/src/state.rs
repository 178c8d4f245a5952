//! Durable per-project extraction state.
//!
//! One pretty-printed JSON document per project at `{state_dir}/{project_id}.json`.
//! Writes go through a temp file in the same directory and a rename, so a
//! crash mid-write leaves the previous version intact.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;

use crate::error::{Result, SheetscanError};
use crate::models::{validate_project_id, ExtractionRecord, ProjectState};

const STATE_EXTENSION: &str = "json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub replaced: usize,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn path_for(&self, project_id: &str) -> PathBuf {
        self.state_dir
            .join(format!("{project_id}.{STATE_EXTENSION}"))
    }

    /// Load a project's state, or an empty state if none was ever persisted.
    ///
    /// An existing file that cannot be read or parsed is reported as
    /// [`SheetscanError::StateCorrupt`]; it is never replaced by an empty state.
    pub fn load(&self, project_id: &str) -> Result<ProjectState> {
        validate_project_id(project_id)?;
        let path = self.path_for(project_id);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(project = %project_id, "No state file yet, starting empty");
                return Ok(ProjectState::new(project_id));
            }
            Err(e) => {
                return Err(SheetscanError::StateCorrupt {
                    path,
                    reason: format!("unreadable: {e}"),
                })
            }
        };

        let state: ProjectState =
            serde_json::from_str(&contents).map_err(|e| SheetscanError::StateCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if state.project_id != project_id {
            return Err(SheetscanError::StateCorrupt {
                path,
                reason: format!(
                    "belongs to project '{}', expected '{project_id}'",
                    state.project_id
                ),
            });
        }

        if let Some(key) = state
            .keys()
            .find(|key| state.get(key).is_some_and(|r| r.relative_path != *key))
        {
            return Err(SheetscanError::StateCorrupt {
                path,
                reason: format!("entry '{key}' does not match its record's relative_path"),
            });
        }

        tracing::debug!(project = %project_id, records = state.len(), "Loaded state");
        Ok(state)
    }

    /// Like [`load`](Self::load) but a missing state file is an error.
    pub fn load_existing(&self, project_id: &str) -> Result<ProjectState> {
        validate_project_id(project_id)?;
        if !self.path_for(project_id).is_file() {
            return Err(SheetscanError::NotFound(format!(
                "No extraction state for project '{project_id}'"
            )));
        }
        self.load(project_id)
    }

    /// Merge records into the state, last write wins per relative path.
    ///
    /// All records must belong to the state's project; otherwise nothing is merged.
    pub fn merge(
        &self,
        state: &mut ProjectState,
        records: Vec<ExtractionRecord>,
    ) -> Result<MergeOutcome> {
        if let Some(stray) = records.iter().find(|r| r.project_id != state.project_id) {
            return Err(SheetscanError::Validation(format!(
                "Record {} belongs to project '{}', not '{}'",
                stray.relative_path, stray.project_id, state.project_id
            )));
        }

        let mut outcome = MergeOutcome::default();
        for record in records {
            if state.upsert(record) {
                outcome.replaced += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    /// Write the whole state atomically and bump `last_updated`.
    pub fn persist(&self, state: &mut ProjectState) -> Result<()> {
        validate_project_id(&state.project_id)?;
        state.touch(Utc::now());

        let mut json = serde_json::to_string_pretty(state)?;
        json.push('\n');

        write_atomically(&self.state_dir, &self.path_for(&state.project_id), json.as_bytes())?;
        tracing::debug!(
            project = %state.project_id,
            records = state.len(),
            "Persisted state"
        );
        Ok(())
    }

    /// Projects that have a state file, sorted by id.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.state_dir)? {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(STATE_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                projects.push(stem.to_string());
            }
        }
        projects.sort();
        Ok(projects)
    }
}

/// Replace `path` with `contents` via a sibling temp file and rename.
pub(crate) fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| SheetscanError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, ExtractedFields, ExtractionTarget};

    fn record(project: &str, page: u32, region: u32, name: &str) -> ExtractionRecord {
        let target = ExtractionTarget {
            project_id: project.to_string(),
            page_number: page,
            region_number: region,
            relative_path: format!("page_{page:03}/{name}"),
            image_id: name.to_string(),
            path: PathBuf::from(name),
        };
        ExtractionRecord::from_target(
            &target,
            ExtractedFields {
                classification: Classification::Plan,
                location: "Level 1".to_string(),
                section_callouts: vec!["A/S01".to_string()],
                element_type: "Floor plan".to_string(),
                text_verbatim: "LEVEL 1 PLAN".to_string(),
                summary: "Plan of level 1".to_string(),
            },
        )
    }

    #[test]
    fn test_load_missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let state = store.load("p1").unwrap();
        assert_eq!(state.project_id, "p1");
        assert!(state.is_empty());
    }

    #[test]
    fn test_load_existing_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        assert!(matches!(
            store.load_existing("p1"),
            Err(SheetscanError::NotFound(_))
        ));
    }

    #[test]
    fn test_merge_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = store.load("p1").unwrap();

        let first = store
            .merge(&mut state, vec![record("p1", 1, 1, "region_1.png")])
            .unwrap();
        assert_eq!(first, MergeOutcome { inserted: 1, replaced: 0 });

        let mut updated = record("p1", 1, 1, "region_1.png");
        updated.summary = "Revised".to_string();
        let second = store.merge(&mut state, vec![updated]).unwrap();
        assert_eq!(second, MergeOutcome { inserted: 0, replaced: 1 });

        assert_eq!(state.len(), 1);
        assert_eq!(state.get("page_001/region_1.png").unwrap().summary, "Revised");
    }

    #[test]
    fn test_merge_rejects_foreign_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = store.load("p1").unwrap();

        let result = store.merge(
            &mut state,
            vec![record("p1", 1, 1, "a.png"), record("p2", 1, 2, "b.png")],
        );
        assert!(matches!(result, Err(SheetscanError::Validation(_))));
        assert!(state.is_empty());
    }

    #[test]
    fn test_persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        let mut state = store.load("p1").unwrap();
        store
            .merge(
                &mut state,
                vec![record("p1", 2, 1, "region_1.png"), record("p1", 1, 3, "region_3.png")],
            )
            .unwrap();
        store.persist(&mut state).unwrap();

        let loaded = store.load("p1").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_persist_unchanged_state_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = store.load("p1").unwrap();
        store
            .merge(&mut state, vec![record("p1", 1, 1, "region_1.png")])
            .unwrap();
        store.persist(&mut state).unwrap();
        let before = fs::read_to_string(store.path_for("p1")).unwrap();

        let mut reloaded = store.load("p1").unwrap();
        store.persist(&mut reloaded).unwrap();
        let after = fs::read_to_string(store.path_for("p1")).unwrap();

        let strip = |s: &str| {
            s.lines()
                .filter(|line| !line.trim_start().starts_with("\"last_updated\""))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(&before), strip(&after));
        assert!(reloaded.last_updated >= state.last_updated);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.path_for("p1"), "{ not json").unwrap();

        match store.load("p1") {
            Err(SheetscanError::StateCorrupt { path, .. }) => {
                assert_eq!(path, store.path_for("p1"));
            }
            other => panic!("Expected StateCorrupt, got: {other:?}"),
        }
        // the corrupt file is left in place for the operator
        assert_eq!(fs::read_to_string(store.path_for("p1")).unwrap(), "{ not json");
    }

    #[test]
    fn test_state_for_other_project_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = ProjectState::new("p2");
        store.persist(&mut state).unwrap();
        fs::rename(store.path_for("p2"), store.path_for("p1")).unwrap();

        assert!(matches!(
            store.load("p1"),
            Err(SheetscanError::StateCorrupt { .. })
        ));
    }

    #[test]
    fn test_list_projects_from_state_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.persist(&mut ProjectState::new("beta")).unwrap();
        store.persist(&mut ProjectState::new("alpha")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.list_projects().unwrap(), vec!["alpha", "beta"]);
    }
}
