use geo::Coord;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::geometry::nearest_point_on_route;
use crate::queries::_structs::{Direction, Line, NearbyRoute};

/// Mínima distancia perpendicular de `point` a cualquiera de los dos
/// sentidos de la línea. Los sentidos sin geometría válida se ignoran; si
/// ninguno es válido devuelve `None`.
pub fn line_distance_to_point(line: &Line, point: Coord<f64>) -> Option<(f64, Direction)> {
    let mut best: Option<(f64, Direction)> = None;

    for direction in [Direction::Ida, Direction::Vuelta] {
        let route = match line.route_line(direction) {
            Ok(route) => route,
            Err(e) => {
                debug!("Line {} ({}) skipped: {}", line.id, direction, e);
                continue;
            }
        };

        let distance = nearest_point_on_route(&route, point).perpendicular_km;
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, direction));
        }
    }

    best
}

/// Encuentra las líneas que pasan a `max_distance_km` o menos de un punto,
/// ordenadas de la más cercana a la más lejana.
///
/// Cada línea aparece una sola vez con la menor distancia de sus dos
/// sentidos. Las líneas con geometría insuficiente se excluyen sin error.
pub fn find_routes_near_point(
    point: Coord<f64>,
    max_distance_km: f64,
    lines: &[Line],
) -> Vec<NearbyRoute> {
    let mut nearby: Vec<NearbyRoute> = lines
        .par_iter()
        .filter_map(|line| {
            let Some((distance_km, direction)) = line_distance_to_point(line, point) else {
                warn!("Line {} has no usable geometry, excluded from search", line.id);
                return None;
            };
            (distance_km <= max_distance_km).then(|| NearbyRoute {
                line: line.clone(),
                distance_km,
                direction,
            })
        })
        .collect();

    nearby.sort_by_key(|r| OrderedFloat(r.distance_km));

    debug!(
        "Found {} of {} lines within {} km of ({}, {})",
        nearby.len(),
        lines.len(),
        max_distance_km,
        point.y,
        point.x
    );
    nearby
}
