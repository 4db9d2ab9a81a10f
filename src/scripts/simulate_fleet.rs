use log::{error, info, LevelFilter};
use std::sync::Arc;

use transit_eta::simulator::Simulator;
use transit_eta::{AppConfig, DataStore, MemoryStore};

/// Simula la flota completa (o la de una línea, si se pasa su id como
/// argumento) sobre el archivo de datos configurado. Ctrl-C detiene todo.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    env_logger::Builder::new()
        .filter_level(
            config
                .server
                .log_level
                .parse()
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    let store: Arc<dyn DataStore> = Arc::new(MemoryStore::from_file(&config.store.data_file)?);
    let simulator = Arc::new(Simulator::new(
        Arc::clone(&store),
        config.simulator.clone(),
        config.store.timeout(),
    ));

    let line_id = std::env::args().nth(1);
    let fleet = {
        let simulator = Arc::clone(&simulator);
        tokio::spawn(async move {
            match simulator.start_fleet(line_id.as_deref()).await {
                Ok(launched) => info!("Launched: {}", launched.join(", ")),
                Err(e) => error!("Fleet launch failed: {}", e),
            }
        })
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut report = tokio::time::interval(config.simulator.tick_interval());

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                for run in simulator.runs() {
                    let position = store
                        .get_vehicle(&run.vehicle_id)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|v| v.current_position);
                    info!(
                        "{} [{} {}] {:?} {:.3}/{:.3} km {:?}",
                        run.vehicle_id,
                        run.line_id,
                        run.direction,
                        run.phase,
                        run.traveled_km,
                        run.route_length_km,
                        position.map(|p| (p.latitude, p.longitude)),
                    );
                }
            }
        }
    }

    let stopped = simulator.shutdown(fleet).await;
    info!("Fleet simulation shut down, {} runs stopped", stopped);
    Ok(())
}
