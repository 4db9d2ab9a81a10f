use geo::HaversineLength;
use geo_types::{Coord, LineString};

use super::RouteLine;

/// Tramo de un recorrido entre dos distancias a lo largo de él.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSlice {
    pub line: LineString<f64>,
    pub start_km: f64,
    pub end_km: f64,
    pub length_km: f64,
}

/// Longitud total del recorrido en km.
pub fn route_length(route: &RouteLine) -> f64 {
    route.length_km()
}

/// Devuelve la coordenada situada a `distance_km` del inicio, recorriendo la
/// polilínea. Es la operación inversa de la proyección; las distancias fuera
/// de rango se ajustan a los extremos.
pub fn point_at_distance(route: &RouteLine, distance_km: f64) -> Coord<f64> {
    if !(distance_km > 0.0) {
        return route.first();
    }
    if distance_km >= route.length_km() {
        return route.last();
    }

    let cumulative = route.cumulative_km();
    // primer vértice estrictamente más allá de la distancia pedida
    let next = cumulative.partition_point(|&d| d <= distance_km);
    let index = next.saturating_sub(1).min(route.segment_count() - 1);

    let seg_len = route.segment_length_km(index);
    let a = route.coords()[index];
    let b = route.coords()[index + 1];
    if seg_len <= 0.0 {
        return a;
    }

    let t = ((distance_km - cumulative[index]) / seg_len).clamp(0.0, 1.0);
    Coord {
        x: a.x + t * (b.x - a.x),
        y: a.y + t * (b.y - a.y),
    }
}

/// Extrae el tramo entre `from_km` y `to_km`. El orden de los argumentos no
/// importa: el tramo siempre va de la distancia menor a la mayor.
pub fn slice_route_by_distance(route: &RouteLine, from_km: f64, to_km: f64) -> RouteSlice {
    let total = route.length_km();
    let clamp = |d: f64| if d.is_nan() { 0.0 } else { d.clamp(0.0, total) };
    let (a, b) = (clamp(from_km), clamp(to_km));
    let (start_km, end_km) = if a <= b { (a, b) } else { (b, a) };

    let mut coords = vec![point_at_distance(route, start_km)];
    for (vertex, &d) in route.coords().iter().zip(route.cumulative_km()) {
        if d > start_km && d < end_km {
            coords.push(*vertex);
        }
    }
    coords.push(point_at_distance(route, end_km));

    let line = LineString::from(coords);
    let length_km = line.haversine_length() / 1000.0;

    RouteSlice {
        line,
        start_km,
        end_km,
        length_km,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn zigzag() -> RouteLine {
        RouteLine::from_lat_lng(vec![
            (-15.500, -70.140),
            (-15.495, -70.135),
            (-15.490, -70.135),
            (-15.485, -70.128),
            (-15.480, -70.130),
        ])
        .unwrap()
    }

    #[test]
    fn test_full_slice_matches_route_length() {
        let line = zigzag();
        let total = route_length(&line);
        let slice = slice_route_by_distance(&line, 0.0, total);
        assert_relative_eq!(slice.length_km, total, epsilon = 1e-9);
        assert_eq!(slice.line.0.len(), line.coords().len());
    }

    #[test]
    fn test_slice_is_symmetric() {
        let line = zigzag();
        let total = route_length(&line);
        for (a, b) in [(0.1, 0.9), (0.25 * total, 0.8 * total), (0.0, total), (0.7, 0.3)] {
            let forward = slice_route_by_distance(&line, a, b);
            let backward = slice_route_by_distance(&line, b, a);
            assert_relative_eq!(forward.length_km, backward.length_km, epsilon = 1e-12);
            assert_eq!(forward.line, backward.line);
            assert!(forward.start_km <= forward.end_km);
        }
    }

    #[test]
    fn test_zero_length_slice() {
        let line = zigzag();
        let total = route_length(&line);
        for d in [0.0, 0.33, total / 2.0, total] {
            let slice = slice_route_by_distance(&line, d, d);
            assert_eq!(slice.length_km, 0.0);
            assert_eq!(slice.line.0.len(), 2);
        }
    }

    #[test]
    fn test_partial_slice_length_is_the_offset_difference() {
        let line = RouteLine::from_lat_lng(vec![(0.0, 0.0), (0.05, 0.0), (0.1, 0.0)]).unwrap();
        let slice = slice_route_by_distance(&line, 1.0, 7.5);
        assert_relative_eq!(slice.length_km, 6.5, epsilon = 1e-6);
        // incluye el vértice intermedio
        assert_eq!(slice.line.0.len(), 3);
    }

    #[test]
    fn test_infinite_offsets_clamp_like_point_at_distance() {
        let line = zigzag();
        let total = route_length(&line);
        let slice = slice_route_by_distance(&line, 0.0, f64::INFINITY);
        assert_eq!(slice.end_km, total);
        assert_relative_eq!(slice.length_km, total, epsilon = 1e-9);
        assert_eq!(point_at_distance(&line, f64::INFINITY), line.last());

        let slice = slice_route_by_distance(&line, f64::NEG_INFINITY, f64::NAN);
        assert_eq!((slice.start_km, slice.end_km), (0.0, 0.0));
    }

    #[test]
    fn test_point_at_distance_clamps_to_ends() {
        let line = zigzag();
        assert_eq!(point_at_distance(&line, -1.0), line.first());
        assert_eq!(point_at_distance(&line, route_length(&line) + 5.0), line.last());
        assert_eq!(point_at_distance(&line, f64::NAN), line.first());
    }

    #[test]
    fn test_point_at_distance_hits_vertices() {
        let line = zigzag();
        for (i, &d) in line.cumulative_km().iter().enumerate() {
            let c = point_at_distance(&line, d);
            assert_relative_eq!(c.x, line.coords()[i].x, epsilon = 1e-12);
            assert_relative_eq!(c.y, line.coords()[i].y, epsilon = 1e-12);
        }
    }
}
