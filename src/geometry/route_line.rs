use geo_types::{Coord, LineString};
use tracing::debug;

use super::{coord_from_lat_lng, haversine_km, GeometryError};

/// Polilínea de un sentido de recorrido, ya limpia y lista para operar.
///
/// Invariantes: al menos 2 puntos, sin coordenadas inválidas y sin
/// duplicados consecutivos. `cumulative_km[i]` es la distancia a lo largo
/// del recorrido desde el inicio hasta el vértice `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteLine {
    line: LineString<f64>,
    cumulative_km: Vec<f64>,
}

impl RouteLine {
    /// Crea la polilínea desde pares `(lat, lng)`. Los puntos no finitos o
    /// fuera de rango se descartan y los duplicados consecutivos se colapsan.
    pub fn from_lat_lng<I>(points: I) -> Result<Self, GeometryError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        Self::from_coords(points.into_iter().map(|(lat, lng)| Coord { x: lng, y: lat }))
    }

    pub fn from_coords<I>(coords: I) -> Result<Self, GeometryError>
    where
        I: IntoIterator<Item = Coord<f64>>,
    {
        let mut cleaned: Vec<Coord<f64>> = Vec::new();
        let mut discarded = 0usize;

        for c in coords {
            if coord_from_lat_lng(c.y, c.x).is_err() {
                discarded += 1;
                continue;
            }
            if cleaned.last() == Some(&c) {
                continue;
            }
            cleaned.push(c);
        }

        if discarded > 0 {
            debug!("Discarded {} invalid coordinates", discarded);
        }
        if cleaned.len() < 2 {
            return Err(GeometryError::InsufficientGeometry(cleaned.len()));
        }

        let mut cumulative_km = Vec::with_capacity(cleaned.len());
        cumulative_km.push(0.0);
        for pair in cleaned.windows(2) {
            let last = cumulative_km[cumulative_km.len() - 1];
            cumulative_km.push(last + haversine_km(pair[0], pair[1]));
        }

        Ok(Self {
            line: LineString::from(cleaned),
            cumulative_km,
        })
    }

    pub fn line(&self) -> &LineString<f64> {
        &self.line
    }

    pub fn coords(&self) -> &[Coord<f64>] {
        &self.line.0
    }

    pub fn cumulative_km(&self) -> &[f64] {
        &self.cumulative_km
    }

    pub fn segment_count(&self) -> usize {
        self.line.0.len() - 1
    }

    /// Longitud del segmento `index` en km.
    pub fn segment_length_km(&self, index: usize) -> f64 {
        self.cumulative_km[index + 1] - self.cumulative_km[index]
    }

    pub fn length_km(&self) -> f64 {
        self.cumulative_km[self.cumulative_km.len() - 1]
    }

    pub fn first(&self) -> Coord<f64> {
        self.line.0[0]
    }

    pub fn last(&self) -> Coord<f64> {
        self.line.0[self.line.0.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_collapses_consecutive_duplicates() {
        let line = RouteLine::from_lat_lng(vec![
            (0.0, 0.0),
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
        ])
        .unwrap();
        assert_eq!(line.coords().len(), 3);
        assert_eq!(line.segment_count(), 2);
        assert_relative_eq!(line.length_km(), 2.0 * 111.195, epsilon = 0.01);
    }

    #[test]
    fn test_filters_non_finite_points() {
        let line = RouteLine::from_lat_lng(vec![(0.0, 0.0), (f64::NAN, 3.0), (1.0, 0.0)]).unwrap();
        assert_eq!(line.coords().len(), 2);
    }

    #[test]
    fn test_filters_out_of_range_points() {
        let line =
            RouteLine::from_lat_lng(vec![(0.0, 0.0), (200.0, 0.0), (1.0, 0.0), (1.0, -181.0)])
                .unwrap();
        assert_eq!(line.coords().len(), 2);
        assert_eq!(
            RouteLine::from_lat_lng(vec![(0.0, 0.0), (95.0, 0.0)]).unwrap_err(),
            GeometryError::InsufficientGeometry(1)
        );
    }

    #[test]
    fn test_all_identical_points_is_insufficient() {
        let err = RouteLine::from_lat_lng(vec![(5.0, 5.0); 4]).unwrap_err();
        assert_eq!(err, GeometryError::InsufficientGeometry(1));
    }

    #[test]
    fn test_empty_and_single_point_are_insufficient() {
        assert_eq!(
            RouteLine::from_lat_lng(Vec::new()).unwrap_err(),
            GeometryError::InsufficientGeometry(0)
        );
        assert!(RouteLine::from_lat_lng(vec![(1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_cumulative_distances_are_non_decreasing() {
        let line = RouteLine::from_lat_lng(vec![(0.0, 0.0), (0.0, 0.5), (0.3, 0.5), (0.3, 1.0)]).unwrap();
        assert!(line.cumulative_km().windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(line.cumulative_km()[0], 0.0);
    }
}
