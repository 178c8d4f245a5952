use std::cmp::Ordering;
use std::path::PathBuf;

/// One discovered image awaiting (or already past) extraction.
///
/// Targets are derived from the filesystem on every run and never stored on
/// their own; `relative_path` is the key into [`super::ProjectState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTarget {
    pub project_id: String,
    pub page_number: u32,
    pub region_number: u32,
    /// Forward-slash path relative to the project directory, e.g. `page_001/region_2.png`
    pub relative_path: String,
    /// File name, unique within a page
    pub image_id: String,
    pub path: PathBuf,
}

impl ExtractionTarget {
    pub fn key(&self) -> &str {
        &self.relative_path
    }
}

/// Page, then region, then file name. Discovery, batching and export all
/// order by this.
pub fn drawing_order(a: (u32, u32, &str), b: (u32, u32, &str)) -> Ordering {
    a.0.cmp(&b.0)
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(b.2))
}

impl Ord for ExtractionTarget {
    fn cmp(&self, other: &Self) -> Ordering {
        drawing_order(
            (self.page_number, self.region_number, &self.image_id),
            (other.page_number, other.region_number, &other.image_id),
        )
        .then_with(|| self.relative_path.cmp(&other.relative_path))
    }
}

impl PartialOrd for ExtractionTarget {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Project ids name a directory under the root and a state file, so they must
/// be a single plain path component.
pub fn validate_project_id(project_id: &str) -> crate::error::Result<()> {
    let invalid = project_id.trim().is_empty()
        || project_id == "."
        || project_id == ".."
        || project_id.contains(['/', '\\'])
        || project_id.contains('\0');

    if invalid {
        return Err(crate::error::SheetscanError::Validation(format!(
            "Invalid project id '{project_id}'"
        )));
    }
    Ok(())
}
