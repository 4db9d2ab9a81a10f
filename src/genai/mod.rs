//! Colaborador de generación de texto.
//!
//! Sólo se usa para redactar resultados ya calculados. Su salida se trata
//! como texto no confiable: ver [`parse`].

use futures::future::BoxFuture;

pub mod gemini;
pub mod parse;

pub use gemini::GeminiClient;
pub use parse::extract_json_object;

#[derive(Debug, thiserror::Error)]
pub enum GenAiError {
    #[error("Text generator not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Model API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Model returned an empty response")]
    EmptyResponse,
    #[error("Model call timed out")]
    Timeout,
}

pub trait TextGenerator: Send + Sync {
    fn generate_text<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, GenAiError>>;
}

/// Genera texto y extrae el primer objeto JSON de la respuesta. Cualquier
/// fallo (llamada o formato) se reporta como `None`.
pub async fn generate_json(
    generator: &dyn TextGenerator,
    prompt: &str,
) -> Option<serde_json::Value> {
    match generator.generate_text(prompt).await {
        Ok(raw) => {
            let parsed = extract_json_object(&raw);
            if parsed.is_none() {
                tracing::warn!("Could not extract JSON from model response");
            }
            parsed
        }
        Err(e) => {
            tracing::warn!("Model call failed: {}", e);
            None
        }
    }
}
