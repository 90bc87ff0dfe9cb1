// ============================================================================
// IMAGE GENERATION — remote text-to-image endpoint
// ============================================================================
//
// Request:  POST {prompt, width, height, transparent: true}
// Response: {image: "<base64 raster>"}; a `data:image/...;base64,` prefix is
// accepted.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};

/// Delay before the first retry; doubles for each further attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub transparent: bool,
}

impl GenerationRequest {
    pub fn new(prompt: &str, width: u32, height: u32) -> Result<Self> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(EditorError::Generation("prompt is empty".into()));
        }
        Ok(Self {
            prompt: prompt.to_string(),
            width,
            height,
            transparent: true,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    image: Option<String>,
    error: Option<String>,
}

/// Decode the `image` field, with or without a data-URL prefix.
pub fn decode_image_field(field: &str) -> Result<Vec<u8>> {
    let payload = match field.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => field,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| EditorError::Generation(format!("response image is not valid base64: {}", e)))
}

/// Extract raster bytes from a JSON response body.
pub fn parse_response(body: &str) -> Result<Vec<u8>> {
    let parsed: GenerationResponse = serde_json::from_str(body)
        .map_err(|e| EditorError::Generation(format!("malformed response: {}", e)))?;
    match (parsed.image, parsed.error) {
        (Some(image), _) if !image.is_empty() => decode_image_field(&image),
        (_, Some(err)) => Err(EditorError::Generation(format!("endpoint reported: {}", err))),
        _ => Err(EditorError::Generation("response has no image".into())),
    }
}

/// Whether an HTTP status is worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}

/// Something that turns a prompt into encoded raster bytes.
pub trait ImageGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub timeout: Duration,
    /// Extra attempts after the first on network errors and 5xx responses.
    pub retries: u32,
}

/// Blocking HTTP client for the generation endpoint.
pub struct HttpGenerator {
    client: reqwest::blocking::Client,
    config: GenerationConfig,
}

enum AttemptError {
    Retryable(String),
    Fatal(EditorError),
}

impl HttpGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(EditorError::Generation("no generation endpoint configured".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EditorError::Generation(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn attempt(&self, request: &GenerationRequest) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(request)
            .send()
            .map_err(|e| AttemptError::Retryable(format!("POST {} failed: {}", self.config.endpoint, e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| AttemptError::Retryable(format!("reading response failed: {}", e)))?;
        if !status.is_success() {
            let msg = format!("{}: {}", status, body.chars().take(200).collect::<String>());
            return Err(if is_retryable_status(status.as_u16()) {
                AttemptError::Retryable(msg)
            } else {
                AttemptError::Fatal(EditorError::Generation(msg))
            });
        }
        parse_response(&body).map_err(AttemptError::Fatal)
    }
}

impl ImageGenerator for HttpGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.attempt(request) {
                Ok(bytes) => return Ok(bytes),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(msg)) => {
                    if attempt >= self.config.retries {
                        return Err(EditorError::Generation(msg));
                    }
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt.min(8));
                    log::warn!(
                        "generation attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        msg,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
