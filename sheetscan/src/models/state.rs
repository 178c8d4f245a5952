use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{drawing_order, ExtractionRecord};

/// Everything extracted so far for one project, keyed by relative path.
///
/// Entries are only ever added or replaced. A `BTreeMap` keeps the persisted
/// form stable so an unchanged state re-serializes to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project_id: String,
    pub last_updated: DateTime<Utc>,
    records: BTreeMap<String, ExtractionRecord>,
}

impl ProjectState {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            last_updated: Utc::now(),
            records: BTreeMap::new(),
        }
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.records.contains_key(relative_path)
    }

    pub fn get(&self, relative_path: &str) -> Option<&ExtractionRecord> {
        self.records.get(relative_path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Records in drawing order (page, region, file name).
    pub fn records_in_order(&self) -> Vec<&ExtractionRecord> {
        let mut records: Vec<&ExtractionRecord> = self.records.values().collect();
        records.sort_by(|a, b| {
            drawing_order(a.order_key(), b.order_key())
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        records
    }

    /// Last-write-wins insert keyed by `relative_path`. Returns true when an
    /// existing entry was replaced.
    pub(crate) fn upsert(&mut self, record: ExtractionRecord) -> bool {
        self.records
            .insert(record.relative_path.clone(), record)
            .is_some()
    }

    /// Advance `last_updated`, never moving it backwards.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_updated {
            self.last_updated = now;
        }
    }
}
