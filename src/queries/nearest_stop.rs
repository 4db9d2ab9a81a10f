use geo::Coord;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::geometry::nearest_point_on_route;
use crate::queries::_structs::{Direction, GeoPoint, Line};

/// Punto de abordaje más cercano al usuario sobre alguna línea.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearestStop {
    pub line_id: String,
    pub line_name: String,
    pub direction: Direction,
    pub point: GeoPoint,
    pub distance_km: f64,
}

impl NearestStop {
    pub fn distance_m(&self) -> u32 {
        (self.distance_km * 1000.0).round() as u32
    }
}

/// Proyecta al usuario sobre cada sentido de cada línea y se queda con el
/// punto más cercano. Con empate gana la primera línea en orden y, dentro de
/// la línea, el sentido de ida.
pub fn find_nearest_stop(user: Coord<f64>, lines: &[Line]) -> Option<NearestStop> {
    let best = lines
        .par_iter()
        .enumerate()
        .flat_map_iter(|(order, line)| {
            [Direction::Ida, Direction::Vuelta]
                .into_iter()
                .filter_map(move |direction| {
                    let route = line.route_line(direction).ok()?;
                    let projection = nearest_point_on_route(&route, user);
                    Some((order, direction, line, projection))
                })
        })
        .min_by_key(|(order, direction, _, projection)| {
            (
                OrderedFloat(projection.perpendicular_km),
                *order,
                *direction == Direction::Vuelta,
            )
        })?;

    let (_, direction, line, projection) = best;
    debug!(
        "Nearest stop on line {} ({}) at {:.3} km",
        line.id, direction, projection.perpendicular_km
    );

    Some(NearestStop {
        line_id: line.id.clone(),
        line_name: line.display_name().to_string(),
        direction,
        point: GeoPoint::from_coord(projection.nearest_point),
        distance_km: projection.perpendicular_km,
    })
}
