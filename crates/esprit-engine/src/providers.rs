use std::collections::BTreeMap;
use std::env;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::StatusCode;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_IMAGEN_MODEL: &str = "imagen-3.0-generate-002";

/// Fixed generation settings, configured once at startup and applied to
/// every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub model: String,
    pub aspect_ratio: String,
    pub safety_filter_level: String,
    pub person_generation: String,
    pub language: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_IMAGEN_MODEL.to_string(),
            aspect_ratio: "3:4".to_string(),
            safety_filter_level: "block_some".to_string(),
            person_generation: "allow_adult".to_string(),
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An external image generator. `Ok(None)` means the provider answered but
/// produced nothing, typically because a safety filter dropped the image.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Option<GeneratedImage>, ProviderError>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry() -> ImageProviderRegistry {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(ImagenProvider::from_env());
    providers
}

/// Offline provider: a flat PNG whose colour is derived from the prompt.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Option<GeneratedImage>, ProviderError> {
        let (width, height) = dims_for_aspect_ratio(&params.aspect_ratio, 512);
        let (r, g, b) = color_from_prompt(prompt);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut encoded = Cursor::new(Vec::new());
        image
            .write_to(&mut encoded, ImageFormat::Png)
            .context("dryrun png encode failed")?;
        Ok(Some(GeneratedImage {
            bytes: encoded.into_inner(),
            mime_type: Some("image/png".to_string()),
        }))
    }
}

/// Imagen over the `:predict` REST endpoint.
pub struct ImagenProvider {
    api_base: String,
    timeout: Duration,
}

impl ImagenProvider {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_env() -> Self {
        let api_base = non_empty_env("IMAGEN_API_BASE")
            .or_else(|| non_empty_env("GEMINI_API_BASE"))
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        let timeout = non_empty_env("IMAGEN_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(120);
        Self::new(api_base, Duration::from_secs(timeout))
    }

    fn api_key() -> Option<String> {
        non_empty_env("IMAGEN_API_KEY")
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn resolve_model_name(raw_model: &str) -> String {
        let trimmed = raw_model.trim().trim_start_matches("models/").to_string();
        match trimmed.to_ascii_lowercase().as_str() {
            "" => DEFAULT_IMAGEN_MODEL.to_string(),
            "imagen-3" | "imagen-3.0" => DEFAULT_IMAGEN_MODEL.to_string(),
            "imagen-4" | "imagen-4.0" => "imagen-4.0-generate-001".to_string(),
            _ => trimmed,
        }
    }

    fn build_payload(prompt: &str, params: &GenerationParams) -> Value {
        json!({
            "instances": [{
                "prompt": prompt,
            }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": params.aspect_ratio,
                "safetySetting": params.safety_filter_level,
                "personGeneration": params.person_generation,
                "language": params.language,
            },
        })
    }

    fn extract_predictions(response_payload: &Value) -> anyhow::Result<Vec<GeneratedImage>> {
        let mut out = Vec::new();
        let predictions = response_payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in predictions {
            let Some(obj) = row.as_object() else {
                continue;
            };
            let encoded = obj
                .get("bytesBase64Encoded")
                .or_else(|| obj.get("bytes_base64_encoded"))
                .and_then(Value::as_str);
            let Some(encoded) = encoded else {
                continue;
            };
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .context("Imagen image base64 decode failed")?;
            out.push(GeneratedImage {
                bytes,
                mime_type: obj
                    .get("mimeType")
                    .or_else(|| obj.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        Ok(out)
    }
}

impl ImageProvider for ImagenProvider {
    fn name(&self) -> &str {
        "imagen"
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Option<GeneratedImage>, ProviderError> {
        let api_key = Self::api_key()
            .ok_or_else(|| anyhow!("IMAGEN_API_KEY, GEMINI_API_KEY, or GOOGLE_API_KEY not set"))?;
        let model = Self::resolve_model_name(&params.model);
        let endpoint = format!("{}/models/{}:predict", self.api_base, model);
        let payload = Self::build_payload(prompt, params);

        // Built per call: the blocking client must not live on an async runtime.
        let http = HttpClient::builder()
            .timeout(self.timeout)
            .build()
            .context("Imagen http client build failed")?;
        let response = http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .with_context(|| format!("Imagen request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Imagen", response)?;
        let mut images = Self::extract_predictions(&response_payload)?;
        if images.is_empty() {
            tracing::warn!(
                model = %model,
                filtered = %filtered_reason(&response_payload).unwrap_or_default(),
                "Imagen returned no images"
            );
            return Ok(None);
        }
        Ok(Some(images.swap_remove(0)))
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value, ProviderError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        return Err(ProviderError::RateLimited(format!(
            "{provider} quota exceeded ({code}): {}",
            truncate_text(&body, 256)
        )));
    }
    if !status.is_success() {
        return Err(anyhow!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        )
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn filtered_reason(response_payload: &Value) -> Option<String> {
    response_payload
        .get("predictions")
        .and_then(Value::as_array)
        .and_then(|rows| {
            rows.iter()
                .filter_map(Value::as_object)
                .find_map(|row| row.get("raiFilteredReason").and_then(Value::as_str))
        })
        .map(str::to_string)
}

fn dims_for_aspect_ratio(aspect_ratio: &str, long_edge: u32) -> (u32, u32) {
    let parsed = aspect_ratio
        .trim()
        .replace('/', ":")
        .split_once(':')
        .and_then(|(w, h)| Some((w.trim().parse::<f64>().ok()?, h.trim().parse::<f64>().ok()?)))
        .filter(|(w, h)| *w > 0.0 && *h > 0.0);
    let Some((w, h)) = parsed else {
        return (long_edge, long_edge);
    };
    if w >= h {
        (long_edge, ((long_edge as f64) * h / w).round().max(1.0) as u32)
    } else {
        (((long_edge as f64) * w / h).round().max(1.0) as u32, long_edge)
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
