use geo::Coord;
use tracing::{debug, warn};

use crate::geometry::{nearest_point_on_route, slice_route_by_distance, GeometryError, RouteLine};
use crate::queries::_structs::{ArrivalEstimate, Direction, Line, Vehicle, VehicleEta};

/// Velocidad promedio por defecto de un bus urbano.
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EtaError {
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("Vehicle {0} has no current position")]
    MissingPosition(String),
    #[error("Vehicle {0} is not running on a route direction")]
    NotEnRoute(String),
}

/// Convierte una distancia en minutos a velocidad constante, con un mínimo
/// de 1 minuto.
pub fn minutes_for_distance(distance_km: f64, speed_kmh: f64) -> u32 {
    (distance_km / speed_kmh * 60.0).round().max(1.0) as u32
}

/// Estima la llegada de un vehículo al usuario sobre un recorrido ya limpio.
///
/// El vehículo debe estar "antes" que el usuario: su índice de segmento no
/// puede superar al del usuario. En caso contrario ya lo pasó y el resultado
/// es `Unreachable`.
pub fn estimate_arrival_on_route(
    route: &RouteLine,
    vehicle_position: Coord<f64>,
    user_position: Coord<f64>,
    speed_kmh: f64,
) -> ArrivalEstimate {
    let vehicle = nearest_point_on_route(route, vehicle_position);
    let user = nearest_point_on_route(route, user_position);

    if vehicle.segment_index > user.segment_index {
        debug!(
            "Vehicle on segment {} already passed user on segment {}",
            vehicle.segment_index, user.segment_index
        );
        return ArrivalEstimate::Unreachable;
    }

    let slice = slice_route_by_distance(route, vehicle.distance_along_km, user.distance_along_km);
    ArrivalEstimate::Minutes(minutes_for_distance(slice.length_km, speed_kmh))
}

/// Estima la llegada de `vehicle` a `user_position` usando el recorrido del
/// sentido en el que circula.
pub fn estimate_arrival(
    line: &Line,
    vehicle: &Vehicle,
    user_position: Coord<f64>,
    speed_kmh: f64,
) -> Result<(Direction, ArrivalEstimate), EtaError> {
    let direction = vehicle
        .status
        .direction()
        .ok_or_else(|| EtaError::NotEnRoute(vehicle.id.clone()))?;

    let position = vehicle
        .current_position
        .filter(|p| p.is_valid())
        .ok_or_else(|| EtaError::MissingPosition(vehicle.id.clone()))?;

    let route = line.route_line(direction)?;
    let estimate = estimate_arrival_on_route(&route, position.to_coord(), user_position, speed_kmh);
    Ok((direction, estimate))
}

/// Calcula la llegada de cada vehículo de la línea y descarta los que ya
/// pasaron al usuario o fallan. Un vehículo con datos defectuosos nunca
/// interrumpe el cálculo de los demás.
pub fn vehicle_etas(
    line: &Line,
    vehicles: &[Vehicle],
    user_position: Coord<f64>,
    speed_kmh: f64,
) -> Vec<VehicleEta> {
    let mut etas: Vec<VehicleEta> = vehicles
        .iter()
        .filter_map(|vehicle| match estimate_arrival(line, vehicle, user_position, speed_kmh) {
            Ok((direction, ArrivalEstimate::Minutes(eta_minutes))) => Some(VehicleEta {
                vehicle_id: vehicle.id.clone(),
                direction,
                eta_minutes,
            }),
            Ok((_, ArrivalEstimate::Unreachable)) => None,
            Err(e) => {
                warn!("Skipping vehicle {} of line {}: {}", vehicle.id, line.id, e);
                None
            }
        })
        .collect();

    etas.sort_by_key(|e| e.eta_minutes);
    etas
}

/// Llegada más próxima entre todos los vehículos de la línea.
pub fn soonest_arrival(
    line: &Line,
    vehicles: &[Vehicle],
    user_position: Coord<f64>,
    speed_kmh: f64,
) -> Option<VehicleEta> {
    vehicle_etas(line, vehicles, user_position, speed_kmh)
        .into_iter()
        .next()
}
