//! Resumable batch extraction of structured records from cropped
//! engineering-drawing region images, with CSV and JSONL export.

pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod extraction;
pub mod models;
pub mod pipeline;
pub mod state;
pub mod vision;

pub use error::{Result, SheetscanError};
