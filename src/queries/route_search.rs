use futures::future::join_all;
use geo::Coord;
use ordered_float::OrderedFloat;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, StoreConfig};
use crate::queries::_structs::{CandidateMatch, Direction, NearbyRoute, VehicleEta};
use crate::queries::eta::vehicle_etas;
use crate::queries::proximity::find_routes_near_point;
use crate::store::{with_timeout, DataStore, StoreError};

/// Parámetros de una búsqueda de líneas hacia un destino.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub max_distance_km: f64,
    pub max_candidates: usize,
    pub speed_kmh: f64,
    pub store_timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::new(&EngineConfig::default(), &StoreConfig::default())
    }
}

impl SearchOptions {
    pub fn new(engine: &EngineConfig, store: &StoreConfig) -> Self {
        Self {
            max_distance_km: engine.max_distance_km,
            max_candidates: engine.max_candidates,
            speed_kmh: engine.average_speed_kmh,
            store_timeout: store.timeout(),
        }
    }
}

/// Deja sólo la llegada más próxima por sentido.
fn soonest_per_direction(etas: Vec<VehicleEta>) -> Vec<VehicleEta> {
    let mut best: Vec<VehicleEta> = Vec::with_capacity(2);
    for direction in [Direction::Ida, Direction::Vuelta] {
        if let Some(eta) = etas
            .iter()
            .filter(|e| e.direction == direction)
            .min_by_key(|e| e.eta_minutes)
        {
            best.push(eta.clone());
        }
    }
    best.sort_by_key(|e| e.eta_minutes);
    best
}

async fn evaluate_candidate(
    store: &dyn DataStore,
    nearby: NearbyRoute,
    user: Coord<f64>,
    options: &SearchOptions,
) -> CandidateMatch {
    let line = nearby.line;
    let etas = match with_timeout(options.store_timeout, store.active_vehicles(Some(&line.id))).await
    {
        Ok(vehicles) => {
            debug!("Line {} has {} active vehicles", line.id, vehicles.len());
            vehicle_etas(&line, &vehicles, user, options.speed_kmh)
        }
        Err(e) => {
            warn!("Could not load vehicles of line {}: {}", line.id, e);
            Vec::new()
        }
    };

    CandidateMatch {
        route_id: line.id.clone(),
        route_name: line.display_name().to_string(),
        perpendicular_km_to_destination: nearby.distance_km,
        vehicle_etas: soonest_per_direction(etas),
    }
}

/// Ordena primero las líneas con llegada estimada (la más pronta primero) y
/// después las que no tienen buses en camino, por cercanía al destino.
pub fn rank_candidates(candidates: &mut [CandidateMatch]) {
    candidates.sort_by_key(|c| {
        (
            c.best_eta().unwrap_or(u32::MAX),
            OrderedFloat(c.perpendicular_km_to_destination),
        )
    });
}

/// Busca las líneas que pasan cerca de `destination` y estima cuándo llega
/// a `user` cada una.
///
/// Sólo falla si no se pueden leer las líneas. Los vehículos de cada línea se
/// consultan en paralelo; si esa consulta falla o vence, la línea queda sin
/// llegadas en lugar de bloquear el resto.
pub async fn find_candidates(
    store: &dyn DataStore,
    destination: Coord<f64>,
    user: Coord<f64>,
    options: &SearchOptions,
) -> Result<Vec<CandidateMatch>, StoreError> {
    let lines = with_timeout(options.store_timeout, store.list_lines()).await?;
    let nearby = find_routes_near_point(destination, options.max_distance_km, &lines);

    info!(
        "{} lines near destination, evaluating up to {}",
        nearby.len(),
        options.max_candidates
    );

    let evaluations = nearby
        .into_iter()
        .take(options.max_candidates)
        .map(|route| evaluate_candidate(store, route, user, options));

    let mut candidates = join_all(evaluations).await;
    rank_candidates(&mut candidates);
    Ok(candidates)
}
