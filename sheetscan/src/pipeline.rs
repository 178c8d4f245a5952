//! Pipeline driver: discovery → state load → batch extraction, per project.
//!
//! Projects are processed one after another and batches within a project
//! strictly in sequence. A project-level failure (corrupt state, unwritable
//! state, missing project directory) is recorded in the report and the run
//! moves on to the next project.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::discovery;
use crate::error::{Result, SheetscanError};
use crate::extraction::{pending_targets, BatchExtractor};
use crate::models::validate_project_id;
use crate::state::StateStore;
use crate::vision::{OpenAiVisionClient, VisionExtractor};

/// Per-project counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSummary {
    pub project_id: String,
    pub discovered: usize,
    pub already_done: usize,
    pub newly_processed: usize,
    pub failed_pending: usize,
    pub batches_failed: usize,
}

#[derive(Debug)]
pub enum ProjectOutcome {
    Completed(ProjectSummary),
    Failed {
        project_id: String,
        error: SheetscanError,
    },
}

impl ProjectOutcome {
    pub fn project_id(&self) -> &str {
        match self {
            ProjectOutcome::Completed(summary) => &summary.project_id,
            ProjectOutcome::Failed { project_id, .. } => project_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub projects: Vec<ProjectOutcome>,
}

impl RunReport {
    pub fn summaries(&self) -> impl Iterator<Item = &ProjectSummary> {
        self.projects.iter().filter_map(|outcome| match outcome {
            ProjectOutcome::Completed(summary) => Some(summary),
            ProjectOutcome::Failed { .. } => None,
        })
    }

    /// True when any project could not be processed at all. Failed batches
    /// alone do not count.
    pub fn has_project_failures(&self) -> bool {
        self.projects
            .iter()
            .any(|outcome| matches!(outcome, ProjectOutcome::Failed { .. }))
    }
}

/// Read-only progress of one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectStatus {
    pub project_id: String,
    pub discovered: usize,
    pub done: usize,
    pub pending: usize,
    /// Records in state whose image is no longer on disk.
    pub orphaned: usize,
}

pub struct Pipeline {
    root_dir: PathBuf,
    store: StateStore,
    extractor: BatchExtractor,
}

impl Pipeline {
    pub fn new(config: &Config, vision: Arc<dyn VisionExtractor>) -> Self {
        Self {
            root_dir: config.root_dir.clone(),
            store: StateStore::new(config.state_dir.clone()),
            extractor: BatchExtractor::new(
                vision,
                config.batch_size,
                config.vision.max_image_dimension,
            ),
        }
    }

    /// Build a pipeline backed by the configured OpenAI-compatible service.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = OpenAiVisionClient::new(&config.vision)?;
        tracing::info!(
            model = %client.model_name(),
            base_url = %client.base_url(),
            batch_size = config.batch_size,
            "Vision client initialized"
        );
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn project_ids(&self, project: Option<&str>) -> Result<Vec<String>> {
        resolve_projects(&self.root_dir, project)
    }

    pub async fn run(&self, project: Option<&str>) -> Result<RunReport> {
        let project_ids = self.project_ids(project)?;
        if project_ids.is_empty() {
            tracing::warn!(root = %self.root_dir.display(), "No projects found");
        }

        let mut report = RunReport::default();
        for project_id in project_ids {
            let outcome = match self.run_project(&project_id).await {
                Ok(summary) => {
                    tracing::info!(
                        project = %summary.project_id,
                        discovered = summary.discovered,
                        already_done = summary.already_done,
                        newly_processed = summary.newly_processed,
                        failed_pending = summary.failed_pending,
                        "Project extraction finished"
                    );
                    ProjectOutcome::Completed(summary)
                }
                Err(error) => {
                    tracing::error!(project = %project_id, error = %error, "Project extraction aborted");
                    ProjectOutcome::Failed { project_id, error }
                }
            };
            report.projects.push(outcome);
        }

        Ok(report)
    }

    pub async fn run_project(&self, project_id: &str) -> Result<ProjectSummary> {
        validate_project_id(project_id)?;

        let targets = discovery::discover_targets(&self.root_dir, project_id)?;
        let mut state = self.store.load(project_id)?;

        let pending = pending_targets(&state, &targets).len();
        let already_done = targets.len() - pending;
        tracing::info!(
            project = %project_id,
            discovered = targets.len(),
            already_done,
            pending,
            "Starting project"
        );

        let outcome = self
            .extractor
            .run(&self.store, &mut state, &targets)
            .await?;

        Ok(ProjectSummary {
            project_id: project_id.to_string(),
            discovered: targets.len(),
            already_done,
            newly_processed: outcome.processed,
            failed_pending: outcome.failed.len(),
            batches_failed: outcome.batches_failed,
        })
    }

    pub fn status(&self, project_id: &str) -> Result<ProjectStatus> {
        project_status(&self.root_dir, &self.store, project_id)
    }
}

/// The requested project, or every project directory under the root.
pub fn resolve_projects(root_dir: &Path, project: Option<&str>) -> Result<Vec<String>> {
    match project {
        Some(project_id) => {
            validate_project_id(project_id)?;
            Ok(vec![project_id.to_string()])
        }
        None => discovery::list_projects(root_dir),
    }
}

/// Status of each requested project. A project that fails is reported in
/// place and the rest are still counted.
pub fn status_report(
    root_dir: &Path,
    store: &StateStore,
    project: Option<&str>,
) -> Result<Vec<(String, Result<ProjectStatus>)>> {
    Ok(resolve_projects(root_dir, project)?
        .into_iter()
        .map(|project_id| {
            let status = project_status(root_dir, store, &project_id);
            (project_id, status)
        })
        .collect())
}

/// Discovery and state only; the vision service is never called.
pub fn project_status(root_dir: &Path, store: &StateStore, project_id: &str) -> Result<ProjectStatus> {
    let targets = discovery::discover_targets(root_dir, project_id)?;
    let state = store.load(project_id)?;

    let pending = pending_targets(&state, &targets).len();
    let discovered: HashSet<&str> = targets.iter().map(|t| t.key()).collect();
    let orphaned = state.keys().filter(|key| !discovered.contains(key)).count();

    Ok(ProjectStatus {
        project_id: project_id.to_string(),
        discovered: targets.len(),
        done: targets.len() - pending,
        pending,
        orphaned,
    })
}
