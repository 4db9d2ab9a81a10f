use chrono::{DateTime, Utc};
use geo::Coord;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::{GeometryError, RouteLine};

// ---------------------------------------------------------------------------
// Documentos del almacén
// ---------------------------------------------------------------------------

/// Coordenada tal como se guarda en el almacén de documentos.
///
/// La deserialización es tolerante: acepta números o cadenas numéricas y
/// los alias `lat`/`lng`. Un valor ausente o ilegible queda como `NaN` y se
/// descarta al construir la geometría.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(
        alias = "lat",
        alias = "_latitude",
        default = "missing_coordinate",
        deserialize_with = "lenient_coordinate"
    )]
    pub latitude: f64,
    #[serde(
        alias = "lng",
        alias = "_longitude",
        default = "missing_coordinate",
        deserialize_with = "lenient_coordinate"
    )]
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        crate::geometry::coord_from_lat_lng(self.latitude, self.longitude).is_ok()
    }

    pub fn to_coord(&self) -> Coord<f64> {
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }

    pub fn from_coord(c: Coord<f64>) -> Self {
        Self::new(c.y, c.x)
    }
}

fn missing_coordinate() -> f64 {
    f64::NAN
}

fn lenient_coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct CoordinateVisitor;

    impl<'de> Visitor<'de> for CoordinateVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or a numeric string")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            Ok(v.trim().parse::<f64>().unwrap_or(f64::NAN))
        }

        fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
            Ok(f64::NAN)
        }

        fn visit_none<E: de::Error>(self) -> Result<f64, E> {
            Ok(f64::NAN)
        }
    }

    deserializer.deserialize_any(CoordinateVisitor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sentido terminal 1 → terminal 2.
    #[serde(alias = "outbound")]
    Ida,
    /// Sentido terminal 2 → terminal 1.
    #[serde(alias = "inbound")]
    Vuelta,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Ida => Direction::Vuelta,
            Direction::Vuelta => Direction::Ida,
        }
    }

    /// Estado del vehículo mientras recorre este sentido.
    pub fn en_route_status(self) -> VehicleStatus {
        match self {
            Direction::Ida => VehicleStatus::EnRutaIda,
            Direction::Vuelta => VehicleStatus::EnRutaVuelta,
        }
    }

    /// Estado del vehículo al terminar este sentido.
    pub fn arrival_status(self) -> VehicleStatus {
        match self {
            Direction::Ida => VehicleStatus::EnTerminal2,
            Direction::Vuelta => VehicleStatus::EnTerminal1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ida => write!(f, "ida"),
            Direction::Vuelta => write!(f, "vuelta"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    EnRutaIda,
    EnRutaVuelta,
    #[serde(rename = "en_terminal_1")]
    EnTerminal1,
    #[serde(rename = "en_terminal_2")]
    EnTerminal2,
    #[default]
    FueraDeServicio,
    /// Valor no reconocido en el documento.
    #[serde(other)]
    Desconocido,
}

impl VehicleStatus {
    /// Sentido que recorre el vehículo, si está en ruta.
    pub fn direction(self) -> Option<Direction> {
        match self {
            VehicleStatus::EnRutaIda => Some(Direction::Ida),
            VehicleStatus::EnRutaVuelta => Some(Direction::Vuelta),
            _ => None,
        }
    }

    pub fn is_en_route(self) -> bool {
        self.direction().is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleStatus::EnRutaIda => "en_ruta_ida",
            VehicleStatus::EnRutaVuelta => "en_ruta_vuelta",
            VehicleStatus::EnTerminal1 => "en_terminal_1",
            VehicleStatus::EnTerminal2 => "en_terminal_2",
            VehicleStatus::FueraDeServicio => "fuera_de_servicio",
            VehicleStatus::Desconocido => "desconocido",
        }
    }
}

/// Línea de transporte con sus dos recorridos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "nombre", alias = "name", default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "horarios", default)]
    pub schedule: Option<String>,
    #[serde(rename = "origen", default)]
    pub origin: Option<String>,
    #[serde(rename = "destino", default)]
    pub destination: Option<String>,
    #[serde(rename = "rutaIda", alias = "outboundPoints", default)]
    pub outbound_points: Vec<GeoPoint>,
    #[serde(rename = "rutaVuelta", alias = "inboundPoints", default)]
    pub inbound_points: Vec<GeoPoint>,
    #[serde(rename = "terminal1Id", alias = "terminal1Ref", default)]
    pub terminal1_id: Option<String>,
    #[serde(rename = "terminal2Id", alias = "terminal2Ref", default)]
    pub terminal2_id: Option<String>,
    #[serde(rename = "empresaId", default)]
    pub company_id: Option<String>,
}

impl Line {
    pub fn points(&self, direction: Direction) -> &[GeoPoint] {
        match direction {
            Direction::Ida => &self.outbound_points,
            Direction::Vuelta => &self.inbound_points,
        }
    }

    /// Polilínea limpia del sentido indicado.
    pub fn route_line(&self, direction: Direction) -> Result<RouteLine, GeometryError> {
        RouteLine::from_lat_lng(
            self.points(direction)
                .iter()
                .map(|p| (p.latitude, p.longitude)),
        )
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Sin nombre"
        } else {
            &self.name
        }
    }

    pub fn terminal_id(&self, terminal: u8) -> Option<&str> {
        match terminal {
            1 => self.terminal1_id.as_deref(),
            2 => self.terminal2_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "placa", alias = "plate", default)]
    pub plate: String,
    #[serde(rename = "lineaId", alias = "routeId", default)]
    pub line_id: String,
    #[serde(rename = "ubicacionActual", alias = "currentPosition", default)]
    pub current_position: Option<GeoPoint>,
    #[serde(rename = "estado", alias = "state", default)]
    pub status: VehicleStatus,
    #[serde(rename = "conductorId", alias = "driverId", default)]
    pub driver_id: Option<String>,
    #[serde(rename = "lastUpdateTimestamp", default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// Punto de interés usable como destino.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Poi {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "nombre", alias = "name", default)]
    pub name: String,
    #[serde(rename = "coordenada", alias = "coordinate", default)]
    pub coordinate: Option<GeoPoint>,
    #[serde(rename = "patrocinado", alias = "sponsored", default)]
    pub sponsored: bool,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Pendiente,
    Aprobada,
    Rechazada,
}

/// Recorrido grabado por un conductor, pendiente de aprobación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouteProposal {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "lineaId")]
    pub line_id: String,
    #[serde(rename = "direccion")]
    pub direction: Option<Direction>,
    #[serde(rename = "puntosGrabados", default)]
    pub recorded_points: Vec<GeoPoint>,
    #[serde(rename = "estadoPropuesta", default)]
    pub status: ProposalStatus,
    #[serde(rename = "conductorId", default)]
    pub driver_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Resultados de consultas
// ---------------------------------------------------------------------------

/// Línea que pasa cerca de un punto.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyRoute {
    pub line: Line,
    /// Mínima distancia perpendicular entre ambos sentidos.
    pub distance_km: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "tipo", content = "minutos", rename_all = "snake_case")]
pub enum ArrivalEstimate {
    Minutes(u32),
    /// El vehículo ya pasó al usuario en ese sentido.
    Unreachable,
}

impl ArrivalEstimate {
    pub fn minutes(self) -> Option<u32> {
        match self {
            ArrivalEstimate::Minutes(m) => Some(m),
            ArrivalEstimate::Unreachable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleEta {
    pub vehicle_id: String,
    pub direction: Direction,
    pub eta_minutes: u32,
}

/// Línea candidata para llegar a un destino, con los tiempos de llegada de
/// sus vehículos activos.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateMatch {
    pub route_id: String,
    pub route_name: String,
    pub perpendicular_km_to_destination: f64,
    pub vehicle_etas: Vec<VehicleEta>,
}

impl CandidateMatch {
    pub fn best_eta(&self) -> Option<u32> {
        self.vehicle_etas.iter().map(|v| v.eta_minutes).min()
    }

    /// Distancia al destino en metros, para mostrar al usuario.
    pub fn distance_to_destination_m(&self) -> u32 {
        (self.perpendicular_km_to_destination * 1000.0).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geo_point_is_lenient() {
        let p: GeoPoint = serde_json::from_value(json!({"lat": "-15.5", "lng": -70.13})).unwrap();
        assert_eq!(p, GeoPoint::new(-15.5, -70.13));

        let missing: GeoPoint = serde_json::from_value(json!({"latitude": 1.0})).unwrap();
        assert!(missing.longitude.is_nan());
        assert!(!missing.is_valid());

        let garbage: GeoPoint =
            serde_json::from_value(json!({"latitude": "abc", "longitude": null})).unwrap();
        assert!(garbage.latitude.is_nan());
        assert!(garbage.longitude.is_nan());
    }

    #[test]
    fn test_line_document_names() {
        let line: Line = serde_json::from_value(json!({
            "id": "l1",
            "nombre": "Línea 5",
            "rutaIda": [{"latitude": 0.0, "longitude": 0.0}, {"latitude": 0.01, "longitude": 0.0}],
            "terminal1Id": "poi-a"
        }))
        .unwrap();

        assert_eq!(line.name, "Línea 5");
        assert_eq!(line.outbound_points.len(), 2);
        assert!(line.inbound_points.is_empty());
        assert!(line.route_line(Direction::Ida).is_ok());
        assert_eq!(
            line.route_line(Direction::Vuelta).unwrap_err(),
            GeometryError::InsufficientGeometry(0)
        );
        assert_eq!(line.terminal_id(1), Some("poi-a"));
        assert_eq!(line.terminal_id(2), None);
    }

    #[test]
    fn test_vehicle_status_mapping() {
        let v: Vehicle = serde_json::from_value(json!({
            "placa": "ABC-123",
            "lineaId": "l1",
            "estado": "en_ruta_vuelta"
        }))
        .unwrap();
        assert_eq!(v.status.direction(), Some(Direction::Vuelta));

        let unknown: Vehicle = serde_json::from_value(json!({"estado": "averiado"})).unwrap();
        assert_eq!(unknown.status, VehicleStatus::Desconocido);
        assert!(!unknown.status.is_en_route());

        assert_eq!(Direction::Ida.arrival_status(), VehicleStatus::EnTerminal2);
        assert_eq!(Direction::Vuelta.arrival_status(), VehicleStatus::EnTerminal1);
    }

    #[test]
    fn test_vehicle_status_stored_strings() {
        let stored = [
            ("en_ruta_ida", VehicleStatus::EnRutaIda),
            ("en_ruta_vuelta", VehicleStatus::EnRutaVuelta),
            ("en_terminal_1", VehicleStatus::EnTerminal1),
            ("en_terminal_2", VehicleStatus::EnTerminal2),
            ("fuera_de_servicio", VehicleStatus::FueraDeServicio),
        ];
        for (text, status) in stored {
            let parsed: VehicleStatus = serde_json::from_value(json!(text)).unwrap();
            assert_eq!(parsed, status);
            assert_eq!(serde_json::to_value(status).unwrap(), json!(text));
            assert_eq!(status.as_str(), text);
        }

        let v: Vehicle = serde_json::from_value(json!({"estado": "en_terminal_2"})).unwrap();
        assert_eq!(v.status, VehicleStatus::EnTerminal2);
    }

    #[test]
    fn test_candidate_best_eta() {
        let candidate = CandidateMatch {
            route_id: "l1".into(),
            route_name: "Línea 1".into(),
            perpendicular_km_to_destination: 0.2344,
            vehicle_etas: vec![
                VehicleEta { vehicle_id: "a".into(), direction: Direction::Ida, eta_minutes: 9 },
                VehicleEta { vehicle_id: "b".into(), direction: Direction::Ida, eta_minutes: 4 },
            ],
        };
        assert_eq!(candidate.best_eta(), Some(4));
        assert_eq!(candidate.distance_to_destination_m(), 234);
    }
}
