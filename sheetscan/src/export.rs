//! Flat exports of a project's state: one CSV table and one JSONL file.
//!
//! Both artifacts share the same field set and order and are regenerated in
//! full on every call. Rows follow drawing order (page, region, file name).

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, SheetscanError};
use crate::models::{validate_project_id, Classification, ExtractionRecord};
use crate::state::{write_atomically, StateStore};

/// Column order shared by both export formats.
pub const EXPORT_COLUMNS: [&str; 11] = [
    "image_id",
    "classification",
    "location",
    "section_callouts",
    "element_type",
    "text_verbatim",
    "summary",
    "page_number",
    "region_number",
    "relative_path",
    "project_id",
];

/// Line-delimited projection of a record. Field order here is the key order
/// of every emitted JSON object.
#[derive(Debug, Serialize)]
struct JsonlRow<'a> {
    image_id: &'a str,
    classification: Classification,
    location: &'a str,
    section_callouts: &'a [String],
    element_type: &'a str,
    text_verbatim: &'a str,
    summary: &'a str,
    page_number: u32,
    region_number: u32,
    relative_path: &'a str,
    project_id: &'a str,
}

impl<'a> From<&'a ExtractionRecord> for JsonlRow<'a> {
    fn from(record: &'a ExtractionRecord) -> Self {
        Self {
            image_id: &record.image_id,
            classification: record.classification,
            location: &record.location,
            section_callouts: &record.section_callouts,
            element_type: &record.element_type,
            text_verbatim: &record.text_verbatim,
            summary: &record.summary,
            page_number: record.page_number,
            region_number: record.region_number,
            relative_path: &record.relative_path,
            project_id: &record.project_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub project_id: String,
    pub rows: usize,
    pub csv_path: PathBuf,
    pub jsonl_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Exporter {
    store: StateStore,
    export_dir: PathBuf,
}

impl Exporter {
    pub fn new(store: StateStore, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            export_dir: export_dir.into(),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn csv_path(&self, project_id: &str) -> PathBuf {
        self.export_dir.join(format!("{project_id}.csv"))
    }

    pub fn jsonl_path(&self, project_id: &str) -> PathBuf {
        self.export_dir.join(format!("{project_id}.jsonl"))
    }

    /// Export one project. Fails with `NotFound` when it has no state yet.
    pub fn export_project(&self, project_id: &str) -> Result<ExportSummary> {
        validate_project_id(project_id)?;
        let state = self.store.load_existing(project_id)?;
        let records = state.records_in_order();

        let csv_path = self.csv_path(project_id);
        let jsonl_path = self.jsonl_path(project_id);
        let csv = render_csv(&records)?;
        let jsonl = render_jsonl(&records)?;

        write_atomically(&self.export_dir, &csv_path, &csv)?;
        if let Err(e) = write_atomically(&self.export_dir, &jsonl_path, &jsonl) {
            tracing::error!(
                project = %project_id,
                csv = %csv_path.display(),
                jsonl = %jsonl_path.display(),
                error = %e,
                "CSV export was replaced but the JSONL export is stale"
            );
            return Err(e);
        }

        tracing::info!(
            project = %project_id,
            rows = records.len(),
            csv = %csv_path.display(),
            jsonl = %jsonl_path.display(),
            "Exported project"
        );

        Ok(ExportSummary {
            project_id: project_id.to_string(),
            rows: records.len(),
            csv_path,
            jsonl_path,
        })
    }

    /// Export every project with persisted state. Each project succeeds or
    /// fails on its own.
    pub fn export_all(&self) -> Result<Vec<(String, Result<ExportSummary>)>> {
        let projects = self.store.list_projects()?;
        if projects.is_empty() {
            tracing::warn!(state_dir = %self.store.state_dir().display(), "No project state to export");
        }

        Ok(projects
            .into_iter()
            .map(|project_id| {
                let result = self.export_project(&project_id);
                if let Err(e) = &result {
                    tracing::error!(project = %project_id, error = %e, "Export failed");
                }
                (project_id, result)
            })
            .collect())
    }
}

/// `["A/S01", "Section A-A"]`: a JSON array literal with a space after each comma.
pub fn callouts_literal(callouts: &[String]) -> Result<String> {
    let items = callouts
        .iter()
        .map(serde_json::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(format!("[{}]", items.join(", ")))
}

fn render_csv(records: &[&ExtractionRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_COLUMNS)?;

    for record in records {
        let page_number = record.page_number.to_string();
        let region_number = record.region_number.to_string();
        let callouts = callouts_literal(&record.section_callouts)?;
        writer.write_record([
            record.image_id.as_str(),
            record.classification.as_str(),
            record.location.as_str(),
            callouts.as_str(),
            record.element_type.as_str(),
            record.text_verbatim.as_str(),
            record.summary.as_str(),
            page_number.as_str(),
            region_number.as_str(),
            record.relative_path.as_str(),
            record.project_id.as_str(),
        ])?;
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| SheetscanError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
}

fn render_jsonl(records: &[&ExtractionRecord]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    for record in records {
        serde_json::to_writer(&mut output, &JsonlRow::from(*record))?;
        output.push(b'\n');
    }
    Ok(output)
}
