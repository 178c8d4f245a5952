//! Extraction collaborator: the external multimodal service.
//!
//! The batch extractor only sees the [`VisionExtractor`] trait. The shipped
//! implementation is [`OpenAiVisionClient`], which speaks the OpenAI
//! chat-completions protocol (OpenAI, OpenRouter, Ollama, LM Studio or any
//! compatible endpoint). Tests substitute their own implementations.
//!
//! The service is unreliable by assumption: every call is fallible and the
//! returned text is parsed defensively by the caller.

mod client;
mod preprocessing;
pub mod prompts;

use async_trait::async_trait;

use crate::error::Result;

pub use client::OpenAiVisionClient;
pub use preprocessing::{prepare_image, PreparedImage};

/// One image of a batch, ready to send. `label` is what the service is asked
/// to echo back as `image_id`.
#[derive(Debug, Clone)]
pub struct BatchImage {
    pub label: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait VisionExtractor: Send + Sync {
    /// Send one batch of images with the extraction instruction and return the
    /// service's raw reply text.
    async fn extract_batch(&self, images: &[BatchImage], instruction: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}
