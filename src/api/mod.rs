use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::chatbot::{ChatError, Chatbot};
use crate::config::AppConfig;
use crate::genai::TextGenerator;
use crate::simulator::{SimulationError, Simulator};
use crate::store::{DataStore, StoreError};

pub mod handlers;
use handlers::{
    alerts, approve_proposal, chatbot, health, line_slice, list_runs, place_at_terminal,
    reject_proposal, start_simulation, stop_simulation,
};

/// Estado compartido por los handlers. Sin almacén configurado todas las
/// rutas que lo necesitan responden 500.
pub struct AppState {
    pub store: Option<Arc<dyn DataStore>>,
    pub chatbot: Option<Chatbot>,
    pub simulator: Option<Arc<Simulator>>,
    pub store_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DataStore>,
        generator: Option<Arc<dyn TextGenerator>>,
        config: &AppConfig,
    ) -> Self {
        let chatbot = Chatbot::new(Arc::clone(&store), generator, config);
        let simulator = Simulator::new(
            Arc::clone(&store),
            config.simulator.clone(),
            config.store.timeout(),
        );
        Self {
            store: Some(store),
            chatbot: Some(chatbot),
            simulator: Some(Arc::new(simulator)),
            store_timeout: config.store.timeout(),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            store: None,
            chatbot: None,
            simulator: None,
            store_timeout: Duration::ZERO,
        }
    }

    pub fn store(&self) -> Result<&Arc<dyn DataStore>, ApiError> {
        self.store.as_ref().ok_or(ApiError::NotConfigured)
    }

    pub fn chatbot(&self) -> Result<&Chatbot, ApiError> {
        self.chatbot.as_ref().ok_or(ApiError::NotConfigured)
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn simulator(&self) -> Result<&Arc<Simulator>, ApiError> {
        self.simulator.as_ref().ok_or(ApiError::NotConfigured)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Servicios no inicializados")]
    NotConfigured,
    #[error("Error interno del servidor")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::InvalidProposal { .. } => ApiError::BadRequest(e.to_string()),
            StoreError::Unavailable(_) | StoreError::Timeout(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Store(e) => e.into(),
        }
    }
}

impl From<SimulationError> for ApiError {
    fn from(e: SimulationError) -> Self {
        match e {
            SimulationError::Store(e) => e.into(),
            SimulationError::VehicleNotFound(_) | SimulationError::LineNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            SimulationError::InvalidRoute { .. }
            | SimulationError::InvalidTerminal(_)
            | SimulationError::TerminalUnavailable { .. } => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotConfigured | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(cause) = self {
            log::error!("Internal error: {}", cause);
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health))
            .route("/chatbot", web::post().to(chatbot))
            .route("/alertas", web::post().to(alerts))
            .route("/simulador", web::get().to(list_runs))
            .route("/simulador/{vehiculo}/iniciar", web::post().to(start_simulation))
            .route("/simulador/{vehiculo}/detener", web::post().to(stop_simulation))
            .route("/simulador/{vehiculo}/terminal", web::post().to(place_at_terminal))
            .route("/propuestas/{id}/aprobar", web::post().to(approve_proposal))
            .route("/propuestas/{id}/rechazar", web::post().to(reject_proposal))
            .route("/lineas/{id}/tramo", web::get().to(line_slice)),
    );
}
