use geo::Coord;
use serde::Serialize;

use super::{haversine_km, RouteLine};

/// Resultado de proyectar un punto sobre un recorrido. No se persiste.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    pub nearest_point: Coord<f64>,
    /// Distancia desde el inicio del recorrido, medida sobre la polilínea.
    pub distance_along_km: f64,
    pub segment_index: usize,
    /// Distancia en línea recta desde el punto consultado al punto más cercano.
    pub perpendicular_km: f64,
}

/// Proyecta `point` sobre el recorrido y devuelve el punto más cercano.
///
/// El parámetro dentro de cada segmento se calcula en un plano
/// equirectangular local (válido para distancias urbanas); la distancia
/// perpendicular es de círculo máximo. Ante empate gana el segmento de menor
/// índice.
pub fn nearest_point_on_route(route: &RouteLine, point: Coord<f64>) -> Projection {
    let scale = point.y.to_radians().cos();
    let to_plane = |c: Coord<f64>| ((c.x - point.x) * scale, c.y - point.y);

    let mut best: Option<Projection> = None;

    for (index, segment) in route.line().lines().enumerate() {
        let (ax, ay) = to_plane(segment.start);
        let (bx, by) = to_plane(segment.end);
        let (dx, dy) = (bx - ax, by - ay);
        let len_sq = dx * dx + dy * dy;

        let t = if len_sq > 0.0 {
            ((-ax * dx - ay * dy) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let nearest = Coord {
            x: segment.start.x + t * (segment.end.x - segment.start.x),
            y: segment.start.y + t * (segment.end.y - segment.start.y),
        };
        let perpendicular_km = haversine_km(point, nearest);

        let improves = match &best {
            Some(current) => perpendicular_km < current.perpendicular_km,
            None => true,
        };
        if improves {
            best = Some(Projection {
                nearest_point: nearest,
                distance_along_km: route.cumulative_km()[index] + t * route.segment_length_km(index),
                segment_index: index,
                perpendicular_km,
            });
        }
    }

    // RouteLine garantiza al menos un segmento
    best.unwrap_or(Projection {
        nearest_point: route.first(),
        distance_along_km: 0.0,
        segment_index: 0,
        perpendicular_km: haversine_km(point, route.first()),
    })
}
