use serde::{Deserialize, Serialize};

use super::{Classification, ExtractionTarget};

/// The six semantic fields the extraction service fills in for one image,
/// after defaults have been applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedFields {
    pub classification: Classification,
    pub location: String,
    pub section_callouts: Vec<String>,
    pub element_type: String,
    pub text_verbatim: String,
    pub summary: String,
}

/// A fully processed image. A record is only ever built whole; there is no
/// partially populated form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub project_id: String,
    pub page_number: u32,
    pub region_number: u32,
    pub relative_path: String,
    pub image_id: String,
    pub classification: Classification,
    pub location: String,
    pub section_callouts: Vec<String>,
    pub element_type: String,
    pub text_verbatim: String,
    pub summary: String,
}

impl ExtractionRecord {
    /// Overlay the target's identity onto the service-provided fields.
    pub fn from_target(target: &ExtractionTarget, fields: ExtractedFields) -> Self {
        Self {
            project_id: target.project_id.clone(),
            page_number: target.page_number,
            region_number: target.region_number,
            relative_path: target.relative_path.clone(),
            image_id: target.image_id.clone(),
            classification: fields.classification,
            location: fields.location,
            section_callouts: fields.section_callouts,
            element_type: fields.element_type,
            text_verbatim: fields.text_verbatim,
            summary: fields.summary,
        }
    }

    pub fn order_key(&self) -> (u32, u32, &str) {
        (self.page_number, self.region_number, &self.image_id)
    }
}
