#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;

use sheetscan::config::{Config, VisionConfig};
use sheetscan::vision::{BatchImage, VisionExtractor};
use sheetscan::{Result, SheetscanError};

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A small, valid PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([255, 255, 255])));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode PNG fixture");
    bytes
}

/// Lays out `{root}/{project}/{page_dir}/{file}` trees inside a temp dir.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::create_dir_all(dir.path().join("projects")).expect("Failed to create root");
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("projects")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.dir.path().join("exports")
    }

    pub fn add_image(&self, project: &str, page_dir: &str, file: &str) -> PathBuf {
        let dir = self.root().join(project).join(page_dir);
        fs::create_dir_all(&dir).expect("Failed to create page dir");
        let path = dir.join(file);
        fs::write(&path, png_bytes()).expect("Failed to write image");
        path
    }

    /// `regions` images named `region_NN.png` under each of `pages` page dirs.
    pub fn add_project(&self, project: &str, pages: u32, regions: u32) {
        for page in 1..=pages {
            for region in 1..=regions {
                self.add_image(
                    project,
                    &format!("page_{page:03}"),
                    &format!("region_{region:02}.png"),
                );
            }
        }
    }

    pub fn config(&self, batch_size: usize) -> Config {
        Config {
            root_dir: self.root(),
            state_dir: self.state_dir(),
            export_dir: self.export_dir(),
            batch_size,
            vision: VisionConfig {
                max_retries: 0,
                max_image_dimension: 0,
                ..VisionConfig::default()
            },
        }
    }

    pub fn state_path(&self, project: &str) -> PathBuf {
        self.state_dir().join(format!("{project}.json"))
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
}

/// Answers every batch with one well-formed entry per image and records
/// the image ids of each call. Calls that include an id from `fail_on`
/// return a service error instead.
#[derive(Default)]
pub struct FakeVision {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on: Mutex<Vec<String>>,
}

impl FakeVision {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, image_ids: &[&str]) {
        *self.fail_on.lock().unwrap() = image_ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl VisionExtractor for FakeVision {
    async fn extract_batch(&self, images: &[BatchImage], _instruction: &str) -> Result<String> {
        let ids: Vec<String> = images.iter().map(|i| i.label.clone()).collect();
        self.calls.lock().unwrap().push(ids.clone());

        let fail_on = self.fail_on.lock().unwrap().clone();
        if ids.iter().any(|id| fail_on.contains(id)) {
            return Err(SheetscanError::VisionRateLimit { retry_after: None });
        }

        let entries: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "image_id": id,
                    "classification": "Section",
                    "location": "Grid B/3",
                    "section_callouts": ["A/S01", "Section A-A"],
                    "element_type": "Wall",
                    "text_verbatim": format!("TEXT {id}"),
                    "summary": format!("Summary of {id}"),
                })
            })
            .collect();
        Ok(json!({ "images": entries }).to_string())
    }

    fn model_name(&self) -> &str {
        "fake-vision"
    }
}
