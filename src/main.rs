use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info, warn};

use transit_eta::api::{self, AppState};
use transit_eta::genai::{GeminiClient, TextGenerator};
use transit_eta::middlewares::RequestLogger;
use transit_eta::{AppConfig, DataStore, MemoryStore};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();

    let generator: Option<Arc<dyn TextGenerator>> = match GeminiClient::from_config(&config.genai) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Text generation disabled, answers will use templates: {}", e);
            None
        }
    };

    // Sin datos el servidor arranca igual y responde 500 en las rutas que los necesitan
    let state = match MemoryStore::from_file(&config.store.data_file) {
        Ok(store) => {
            info!("Data loaded from {}", config.store.data_file.display());
            let store: Arc<dyn DataStore> = Arc::new(store);
            AppState::new(store, generator, &config)
        }
        Err(e) => {
            error!("Could not load {}: {}", config.store.data_file.display(), e);
            AppState::unconfigured()
        }
    };
    let state = web::Data::new(state);

    let address = (config.server.host.clone(), config.server.port);
    info!("Listening on {}:{}", address.0, address.1);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(RequestLogger)
            .configure(api::config)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
