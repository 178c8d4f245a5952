//! Batch extraction: pending targets → fixed-size batches → vision service →
//! complete records → merged and persisted state, one batch at a time.

pub mod response;

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, SheetscanError};
use crate::models::{ExtractionRecord, ExtractionTarget, ProjectState};
use crate::state::StateStore;
use crate::vision::{prepare_image, prompts, BatchImage, VisionExtractor};

pub use response::parse_batch_response;

/// What one extraction pass over a project did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub batches_attempted: usize,
    pub batches_failed: usize,
    pub processed: usize,
    /// Relative paths of targets whose batch failed; still pending.
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct BatchExtractor {
    vision: Arc<dyn VisionExtractor>,
    batch_size: usize,
    max_image_dimension: u32,
}

/// Targets not yet present in the state, in discovery order.
pub fn pending_targets<'a>(
    state: &ProjectState,
    targets: &'a [ExtractionTarget],
) -> Vec<&'a ExtractionTarget> {
    targets.iter().filter(|t| !state.contains(t.key())).collect()
}

impl BatchExtractor {
    pub fn new(vision: Arc<dyn VisionExtractor>, batch_size: usize, max_image_dimension: u32) -> Self {
        Self {
            vision,
            batch_size: batch_size.max(1),
            max_image_dimension,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Extract every pending target, persisting after each successful batch.
    ///
    /// The pending set is recomputed from `state` before each batch. A batch
    /// that fails with a recoverable error is logged, its targets are left
    /// pending, and the run continues. Unrecoverable errors (for example the
    /// state file cannot be written) abort the pass.
    pub async fn run(
        &self,
        store: &StateStore,
        state: &mut ProjectState,
        targets: &[ExtractionTarget],
    ) -> Result<ExtractionOutcome> {
        let mut outcome = ExtractionOutcome::default();
        let mut deferred: HashSet<&str> = HashSet::new();

        loop {
            let batch: Vec<&ExtractionTarget> = targets
                .iter()
                .filter(|t| !state.contains(t.key()) && !deferred.contains(t.key()))
                .take(self.batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            outcome.batches_attempted += 1;
            let batch_index = outcome.batches_attempted;
            let image_ids: Vec<&str> = batch.iter().map(|t| t.relative_path.as_str()).collect();

            tracing::info!(
                project = %state.project_id,
                batch = batch_index,
                size = batch.len(),
                "Extracting batch"
            );

            match self.extract_batch(&batch).await {
                Ok(records) => {
                    let merged = store.merge(state, records)?;
                    store.persist(state)?;
                    outcome.processed += batch.len();
                    tracing::info!(
                        project = %state.project_id,
                        batch = batch_index,
                        inserted = merged.inserted,
                        replaced = merged.replaced,
                        total = state.len(),
                        "Batch merged and persisted"
                    );
                }
                Err(error) if error.is_batch_recoverable() => {
                    outcome.batches_failed += 1;
                    tracing::error!(
                        project = %state.project_id,
                        batch = batch_index,
                        images = ?image_ids,
                        error = %error,
                        "Batch failed, images stay pending for the next run"
                    );
                    for target in &batch {
                        deferred.insert(target.key());
                        outcome.failed.push(target.relative_path.clone());
                    }
                }
                Err(error) => return Err(error),
            }
        }

        Ok(outcome)
    }

    /// One call to the service for one batch. Either every image in the batch
    /// yields a complete record or the whole batch is an error.
    pub async fn extract_batch(
        &self,
        batch: &[&ExtractionTarget],
    ) -> Result<Vec<ExtractionRecord>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut images = Vec::with_capacity(batch.len());
        for target in batch {
            let bytes = tokio::fs::read(&target.path).await.map_err(|e| {
                SheetscanError::Image(format!("Failed to read {}: {e}", target.path.display()))
            })?;
            let prepared = prepare_image(bytes, &target.image_id, self.max_image_dimension)?;
            images.push(BatchImage {
                label: target.relative_path.clone(),
                mime_type: prepared.mime_type,
                bytes: prepared.bytes,
            });
        }

        let labels: Vec<&str> = batch.iter().map(|t| t.relative_path.as_str()).collect();
        let instruction = prompts::batch_extraction_prompt(&labels);

        let raw = self.vision.extract_batch(&images, &instruction).await?;
        tracing::debug!(
            model = %self.vision.model_name(),
            response_len = raw.len(),
            "Vision response received"
        );

        parse_batch_response(&raw, batch)
    }
}
