use geo::Coord;
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::geometry::haversine_km;
use crate::queries::_structs::{Direction, Vehicle};

/// Vehículo en ruta dentro del radio de alerta del usuario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyVehicle {
    pub vehicle_id: String,
    pub plate: String,
    pub line_id: String,
    pub direction: Direction,
    pub distance_km: f64,
}

impl NearbyVehicle {
    pub fn distance_m(&self) -> u32 {
        (self.distance_km * 1000.0).round() as u32
    }
}

/// Vehículos en ruta a `radius_km` o menos del usuario (distancia en línea
/// recta), del más cercano al más lejano. Los que no tienen posición válida
/// o no están en ruta se ignoran.
pub fn vehicles_near_point(
    user: Coord<f64>,
    radius_km: f64,
    vehicles: &[Vehicle],
) -> Vec<NearbyVehicle> {
    let mut nearby: Vec<NearbyVehicle> = vehicles
        .iter()
        .filter_map(|vehicle| {
            let direction = vehicle.status.direction()?;
            let position = vehicle.current_position.filter(|p| p.is_valid())?;
            let distance_km = haversine_km(position.to_coord(), user);
            (distance_km <= radius_km).then(|| NearbyVehicle {
                vehicle_id: vehicle.id.clone(),
                plate: vehicle.plate.clone(),
                line_id: vehicle.line_id.clone(),
                direction,
                distance_km,
            })
        })
        .collect();

    nearby.sort_by_key(|v| OrderedFloat(v.distance_km));
    nearby
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::_structs::{GeoPoint, VehicleStatus};

    const KM_PER_DEGREE: f64 = 111.195;

    fn vehicle(id: &str, north_km: f64, status: VehicleStatus) -> Vehicle {
        Vehicle {
            id: id.into(),
            plate: format!("P-{}", id),
            line_id: "l1".into(),
            current_position: Some(GeoPoint::new(north_km / KM_PER_DEGREE, 0.0)),
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_radius_and_order() {
        let vehicles = vec![
            vehicle("lejos", 1.2, VehicleStatus::EnRutaIda),
            vehicle("medio", 0.6, VehicleStatus::EnRutaVuelta),
            vehicle("cerca", 0.1, VehicleStatus::EnRutaIda),
            vehicle("parado", 0.05, VehicleStatus::EnTerminal1),
        ];

        let nearby = vehicles_near_point(Coord { x: 0.0, y: 0.0 }, 0.8, &vehicles);
        let ids: Vec<_> = nearby.iter().map(|v| v.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["cerca", "medio"]);
        assert_eq!(nearby[1].direction, Direction::Vuelta);
        assert_eq!(nearby[0].distance_m(), 100);
    }

    #[test]
    fn test_invalid_positions_skipped() {
        let mut no_position = vehicle("a", 0.1, VehicleStatus::EnRutaIda);
        no_position.current_position = None;
        let mut bad_position = vehicle("b", 0.1, VehicleStatus::EnRutaIda);
        bad_position.current_position = Some(GeoPoint::new(f64::NAN, 0.0));

        assert!(vehicles_near_point(Coord { x: 0.0, y: 0.0 }, 0.8, &[no_position, bad_position])
            .is_empty());
    }
}
