use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

use super::{GenAiError, TextGenerator};
use crate::config::GenAiConfig;

/// Cliente mínimo para `generateContent` de la API de Gemini.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    /// Crea el cliente si hay API key configurada.
    pub fn from_config(config: &GenAiConfig) -> Result<Self, GenAiError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(GenAiError::NotConfigured)?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_key,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }

    fn request_body(prompt: &str) -> serde_json::Value {
        let threshold = "BLOCK_LOW_AND_ABOVE";
        json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "safetySettings": [
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold },
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold },
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }
            ]
        })
    }

    async fn call(&self, prompt: &str) -> Result<String, GenAiError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        debug!("Calling model {} ({} chars prompt)", self.model, prompt.len());

        let send = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt))
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| GenAiError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Model API error {}: {}", status, body);
            return Err(GenAiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        extract_text(parsed)
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, GenAiError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(GenAiError::EmptyResponse);
    }
    Ok(text.to_string())
}

impl TextGenerator for GeminiClient {
    fn generate_text<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, GenAiError>> {
        self.call(prompt).boxed()
    }
}
