//! Asistente de viaje: detecta la intención de la pregunta, consulta el motor
//! y redacta la respuesta. Todas las respuestas tienen una versión de
//! plantilla para cuando el modelo de texto no está disponible.

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::genai::TextGenerator;
use crate::queries::SearchOptions;
use crate::store::{DataStore, StoreError};

pub mod handlers;
pub mod intent;
pub mod router;

pub use handlers::Alert;
pub use intent::{detect_intent, DetectedIntent, Intent, KnownNames, NamesCache};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Data store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Chatbot {
    store: Arc<dyn DataStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    search: SearchOptions,
    alert_radius_km: f64,
    names: NamesCache,
}

impl Chatbot {
    pub fn new(
        store: Arc<dyn DataStore>,
        generator: Option<Arc<dyn TextGenerator>>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            generator,
            search: SearchOptions::new(&config.engine, &config.store),
            alert_radius_km: config.engine.alert_radius_km,
            names: NamesCache::new(Duration::from_secs(config.store.names_cache_secs)),
        }
    }

    fn generator(&self) -> Option<&dyn TextGenerator> {
        self.generator.as_deref()
    }

    fn timeout(&self) -> Duration {
        self.search.store_timeout
    }

    /// Pide al modelo que redacte `prompt`; si no hay modelo o falla,
    /// devuelve la plantilla.
    async fn phrase(&self, prompt: &str, fallback: String) -> String {
        let Some(generator) = self.generator() else {
            return fallback;
        };
        match generator.generate_text(prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Model could not phrase answer, using template: {}", e);
                fallback
            }
        }
    }
}
