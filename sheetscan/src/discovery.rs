//! Region discovery: turns a project's image tree into ordered extraction targets.
//!
//! Layout is `root/{project_id}/page_{NNN}/{region_label}_{...}.{ext}`. Only
//! page directories directly under the project are scanned, and only files
//! directly inside them. Anything that does not fit is skipped with a
//! warning rather than failing the project.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SheetscanError};
use crate::models::ExtractionTarget;

pub const ACCEPTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

static PAGE_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^page[_\- ]?(\d+)$").expect("page pattern is valid"));
static REGION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:region|reg|r)?[_\- ]?(\d+)(?:[_\-. ]|$)").expect("region pattern is valid")
});

/// Page number from a directory name such as `page_007`. Zero is not a page.
pub fn parse_page_number(dir_name: &str) -> Option<u32> {
    PAGE_DIR
        .captures(dir_name)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .filter(|page| *page > 0)
}

/// Region number from the leading label of a file stem, e.g. `region_3_detail`.
pub fn parse_region_number(file_stem: &str) -> Option<u32> {
    REGION_LABEL
        .captures(file_stem)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .filter(|region| *region > 0)
}

pub fn is_accepted_image(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(ext))
        })
}

/// Project directories under `root`, sorted by name. Hidden directories are ignored.
pub fn list_projects(root: &Path) -> Result<Vec<String>> {
    let mut projects = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') => {}
            Ok(name) => projects.push(name),
            Err(raw) => {
                tracing::warn!(name = ?raw, "Skipping project directory with non UTF-8 name");
            }
        }
    }

    projects.sort();
    Ok(projects)
}

/// Discover every image target of one project, in drawing order.
pub fn discover_targets(root: &Path, project_id: &str) -> Result<Vec<ExtractionTarget>> {
    let project_dir = root.join(project_id);
    if !project_dir.is_dir() {
        return Err(SheetscanError::NotFound(format!(
            "Project directory {} not found",
            project_dir.display()
        )));
    }

    let entries = fs::read_dir(&project_dir).map_err(|e| {
        SheetscanError::Discovery(format!("Cannot read {}: {e}", project_dir.display()))
    })?;

    let mut pages = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(project = %project_id, error = %e, "Skipping unreadable project entry");
                continue;
            }
        };
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(project = %project_id, "Skipping entry with non UTF-8 name");
            continue;
        };
        // follows symlinks, unlike DirEntry::file_type
        if !entry.path().is_dir() {
            if is_accepted_image(&name) {
                tracing::warn!(project = %project_id, entry = %name, "Skipping image outside page directories");
            } else {
                tracing::debug!(project = %project_id, entry = %name, "Ignoring file outside page directories");
            }
            continue;
        }
        match parse_page_number(&name) {
            Some(page_number) => pages.push((page_number, name)),
            None => {
                tracing::warn!(
                    project = %project_id,
                    directory = %name,
                    "Skipping directory with unparsable page number"
                );
            }
        }
    }

    let targets = scan_pages(&project_dir, project_id, pages);
    tracing::debug!(project = %project_id, targets = targets.len(), "Discovery complete");
    Ok(targets)
}

/// Scan each page directory. A page that cannot be read is skipped so the
/// rest of the project is still discovered.
fn scan_pages(
    project_dir: &Path,
    project_id: &str,
    pages: Vec<(u32, String)>,
) -> Vec<ExtractionTarget> {
    let mut targets = Vec::new();
    for (page_number, page_dir) in pages {
        match scan_page(project_dir, project_id, page_number, &page_dir) {
            Ok(page_targets) => targets.extend(page_targets),
            Err(e) => {
                tracing::warn!(
                    project = %project_id,
                    page = %page_dir,
                    error = %e,
                    "Skipping unreadable page directory"
                );
            }
        }
    }
    targets.sort();
    targets
}

fn scan_page(
    project_dir: &Path,
    project_id: &str,
    page_number: u32,
    page_dir: &str,
) -> Result<Vec<ExtractionTarget>> {
    let page_path = project_dir.join(page_dir);

    let mut files = Vec::new();
    for entry in fs::read_dir(&page_path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(project = %project_id, page = %page_dir, error = %e, "Skipping unreadable page entry");
                continue;
            }
        };
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!(page = %page_dir, name = ?raw, "Skipping image with non UTF-8 name");
                continue;
            }
        };
        match fs::metadata(entry.path()) {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                tracing::warn!(project = %project_id, page = %page_dir, entry = %name, "Skipping nested directory in page");
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    project = %project_id,
                    page = %page_dir,
                    entry = %name,
                    error = %e,
                    "Skipping unreadable page entry"
                );
                continue;
            }
        }
        if is_accepted_image(&name) {
            files.push(name);
        } else {
            tracing::debug!(project = %project_id, page = %page_dir, file = %name, "Skipping file with unaccepted extension");
        }
    }
    files.sort();

    let mut targets = Vec::with_capacity(files.len());
    for (index, file_name) in files.into_iter().enumerate() {
        let stem = Path::new(&file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        let region_number = match parse_region_number(stem) {
            Some(region) => region,
            None => {
                let fallback = index as u32 + 1;
                tracing::warn!(
                    project = %project_id,
                    page = %page_dir,
                    file = %file_name,
                    fallback_region = fallback,
                    "No region number in file name, using lexical position"
                );
                fallback
            }
        };

        targets.push(ExtractionTarget {
            project_id: project_id.to_string(),
            page_number,
            region_number,
            relative_path: format!("{page_dir}/{file_name}"),
            path: page_path.join(&file_name),
            image_id: file_name,
        });
    }

    Ok(targets)
}
