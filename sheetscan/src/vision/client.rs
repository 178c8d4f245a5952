use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{BatchImage, VisionExtractor};
use crate::config::{parse_vision_provider_model, provider_requires_api_key, VisionConfig};
use crate::error::{Result, SheetscanError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

/// Vision client for any OpenAI-compatible chat-completions endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiVisionClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_retries: u32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

impl OpenAiVisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let (provider, model) = parse_vision_provider_model(&config.model);

        if provider_requires_api_key(provider) && config.api_key.is_none() {
            return Err(SheetscanError::Config(format!(
                "API key required for vision model '{}'",
                config.model
            )));
        }

        let base_url = match (&config.base_url, default_base_url(provider)) {
            (Some(url), _) => url.clone(),
            (None, Some(url)) => url.to_string(),
            (None, None) => {
                return Err(SheetscanError::Config(format!(
                    "Base URL required for vision model '{}' without a provider prefix",
                    config.model
                )));
            }
        };

        let model = if provider.eq_ignore_ascii_case("local") {
            config.model.clone()
        } else {
            model.to_string()
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SheetscanError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_retries: config.max_retries,
            max_tokens: config.max_tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, images: &[BatchImage], instruction: &str) -> ChatRequest {
        let mut content = vec![ContentPart::Text {
            text: instruction.to_string(),
        }];

        for (index, image) in images.iter().enumerate() {
            content.push(ContentPart::Text {
                text: format!("Image {}: {}", index + 1, image.label),
            });
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!(
                        "data:{};base64,{}",
                        image.mime_type,
                        STANDARD.encode(&image.bytes)
                    ),
                    detail: "high".to_string(),
                },
            });
        }

        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        }
    }

    async fn make_request(&self, request: &ChatRequest) -> Result<String> {
        let mut retries = 0;

        loop {
            let mut builder = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Content-Type", "application/json")
                .json(request);
            if let Some(api_key) = &self.api_key {
                builder = builder.header("Authorization", format!("Bearer {api_key}"));
            }

            let error = match builder.send().await {
                Ok(resp) if resp.status().is_success() => return Self::read_content(resp).await,
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(SheetscanError::VisionAuth(format!("{status} - {body}")));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        SheetscanError::VisionRateLimit {
                            retry_after: retry_after_secs(&resp),
                        }
                    } else if status.is_server_error() {
                        SheetscanError::Vision(format!("API request failed: {status}"))
                    } else {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(SheetscanError::Vision(format!(
                            "API request failed: {status} - {body}"
                        )));
                    }
                }
                Err(e) => SheetscanError::Vision(format!("API request failed: {e}")),
            };

            if retries >= self.max_retries {
                return Err(match error {
                    SheetscanError::Vision(message) => SheetscanError::Vision(format!(
                        "{message} (after {retries} retries)"
                    )),
                    other => other,
                });
            }

            retries += 1;
            let delay = Duration::from_millis(100 * (2_u64.pow(retries)));
            tracing::debug!(attempt = retries, delay_ms = delay.as_millis() as u64, error = %error, "Retrying vision request");
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_content(resp: Response) -> Result<String> {
        let chat_response: ChatResponse = resp
            .json()
            .await
            .map_err(|e| SheetscanError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| SheetscanError::MalformedResponse("No content in response".to_string()))
    }
}

#[async_trait]
impl VisionExtractor for OpenAiVisionClient {
    async fn extract_batch(&self, images: &[BatchImage], instruction: &str) -> Result<String> {
        if images.is_empty() {
            return Err(SheetscanError::Validation(
                "Extraction batch cannot be empty".to_string(),
            ));
        }

        let request = self.build_request(images, instruction);
        self.make_request(&request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn retry_after_secs(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "openai" => Some(OPENAI_BASE_URL),
        "openrouter" => Some(OPENROUTER_BASE_URL),
        "ollama" => Some(OLLAMA_BASE_URL),
        "lmstudio" => Some(LMSTUDIO_BASE_URL),
        _ => None,
    }
}
