//! Geometría de recorridos: limpieza de polilíneas, proyección de puntos,
//! cortes por distancia y distancias geodésicas.
//!
//! Todas las distancias de este módulo están en kilómetros. Las coordenadas
//! siguen la convención de `geo`: `x` = longitud, `y` = latitud.

use geo::{Coord, HaversineDistance, Point};

pub mod projection;
pub mod route_line;
pub mod slice;

pub use projection::{nearest_point_on_route, Projection};
pub use route_line::RouteLine;
pub use slice::{point_at_distance, route_length, slice_route_by_distance, RouteSlice};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Insufficient geometry: {0} valid points after cleaning")]
    InsufficientGeometry(usize),
    #[error("Invalid coordinate (lat: {lat}, lng: {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },
}

/// Distancia de círculo máximo en kilómetros.
pub fn haversine_km(a: Coord<f64>, b: Coord<f64>) -> f64 {
    Point::from(a).haversine_distance(&Point::from(b)) / 1000.0
}

/// Construye una coordenada validada a partir de latitud y longitud.
pub fn coord_from_lat_lng(lat: f64, lng: f64) -> Result<Coord<f64>, GeometryError> {
    if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
        return Err(GeometryError::InvalidCoordinate { lat, lng });
    }
    Ok(Coord { x: lng, y: lat })
}
