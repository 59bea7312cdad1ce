//! Collaborator seams and their blocking HTTP implementations.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use sab_contracts::chat::ChatRequest;
use sab_contracts::payload::GenerationRequest;
use serde_json::{json, Value};

use crate::{first_non_empty_env, response_json_or_error, truncate_text};

/// The remote image-generation service.
pub trait ImageService: Send + Sync {
    /// `POST /API/GetNewSession`, raw JSON response.
    fn new_session(&self) -> Result<Value>;

    /// `POST /API/GenerateText2Image`, raw JSON response.
    fn generate(&self, request: &GenerationRequest) -> Result<Value>;

    /// `GET` an image reference returned by [`ImageService::generate`].
    fn fetch_image(&self, image_ref: &str) -> Result<Vec<u8>>;
}

/// A chat-completion capable language model. Returns the first choice's text.
pub trait ChatCompletion: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Transport knobs shared by every client. `None` keeps reqwest's default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout: Option<Duration>,
}

impl HttpSettings {
    fn client(&self) -> Result<HttpClient> {
        let mut builder = HttpClient::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().context("failed building HTTP client")
    }
}

pub struct SwarmHttpClient {
    base_url: String,
    http: HttpClient,
}

impl SwarmHttpClient {
    pub fn new(base_url: impl Into<String>, settings: &HttpSettings) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            bail!("generation service base URL is empty");
        }
        Ok(Self {
            base_url,
            http: settings.client()?,
        })
    }

    pub fn for_host(hostname: &str, port: u16, settings: &HttpSettings) -> Result<Self> {
        Self::new(format!("http://{}:{}", hostname.trim(), port), settings)
    }

    fn api_endpoint(&self, name: &str) -> String {
        format!("{}/API/{name}", self.base_url)
    }

    fn post_json(&self, name: &str, body: &impl serde::Serialize) -> Result<Value> {
        let endpoint = self.api_endpoint(name);
        let response = self
            .http
            .post(&endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .with_context(|| format!("{name} request failed ({endpoint})"))?;
        response_json_or_error(name, response)
    }
}

impl ImageService for SwarmHttpClient {
    fn new_session(&self) -> Result<Value> {
        self.post_json("GetNewSession", &json!({}))
    }

    fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        self.post_json("GenerateText2Image", request)
    }

    fn fetch_image(&self, image_ref: &str) -> Result<Vec<u8>> {
        let url = join_image_url(&self.base_url, image_ref);
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("failed downloading image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!("image download failed ({code}): {}", truncate_text(&body, 512));
        }
        let bytes = response
            .bytes()
            .context("failed reading image bytes")?
            .to_vec();
        Ok(bytes)
    }
}

/// Absolute `http(s)` references are used as-is; anything else is joined to
/// the base URL with a single `/`.
pub fn join_image_url(base_url: &str, image_ref: &str) -> String {
    let image_ref = image_ref.trim();
    if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
        return image_ref.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        image_ref.trim_start_matches('/')
    )
}

pub struct OpenAiChatClient {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl OpenAiChatClient {
    /// Reads `OPENAI_API_BASE`/`OPENAI_BASE_URL` and `OPENAI_API_KEY`. A
    /// missing key only fails once a completion is requested.
    pub fn from_env(settings: &HttpSettings) -> Result<Self> {
        let raw_base = first_non_empty_env(&["OPENAI_API_BASE", "OPENAI_BASE_URL"])
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self::new(
            normalize_openai_api_base(&raw_base),
            first_non_empty_env(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
            settings,
        )
    }

    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        settings: &HttpSettings,
    ) -> Result<Self> {
        Ok(Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key,
            http: settings.client()?,
        })
    }
}

impl ChatCompletion for OpenAiChatClient {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("OPENAI_API_KEY is not set");
        };
        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .with_context(|| format!("chat completion request failed ({endpoint})"))?;
        let payload = response_json_or_error("chat completion", response)?;
        first_choice_text(&payload)
    }
}

fn normalize_openai_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}

/// Text of `choices[0].message.content`, plain or as text parts.
pub fn first_choice_text(payload: &Value) -> Result<String> {
    let Some(choice) = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        bail!("chat completion returned no choices");
    };
    let content = choice.get("message").and_then(|message| message.get("content"));
    let text = match content {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<&str>>()
            .join("\n"),
        _ => bail!("chat completion choice has no message content"),
    };
    if text.is_empty() {
        bail!("chat completion returned empty content");
    }
    Ok(text)
}
