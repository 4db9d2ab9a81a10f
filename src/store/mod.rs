//! Acceso al almacén de documentos (líneas, vehículos, POIs y propuestas).
//!
//! El motor sólo conoce el trait [`DataStore`]; la implementación incluida es
//! un almacén en memoria que se carga desde un archivo JSON con la misma
//! forma que las colecciones de Firestore.

use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;

use crate::queries::_structs::{GeoPoint, Line, Poi, RouteProposal, Vehicle, VehicleStatus};

pub mod data_loader;
pub mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use data_loader::{DataLoader, LoaderError};
pub use memory::MemoryStore;

pub const LINES: &str = "Lineas";
pub const VEHICLES: &str = "Vehiculos";
pub const POIS: &str = "Ubicaciones_POI";
pub const PROPOSALS: &str = "PropuestasRuta";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Data store unavailable: {0}")]
    Unavailable(String),
    #[error("Data store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Document {collection}/{id} not found")]
    NotFound { collection: &'static str, id: String },
    #[error("Invalid proposal {id}: {reason}")]
    InvalidProposal { id: String, reason: String },
}

/// Escritura del estado en vivo de un vehículo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleUpdate {
    pub position: Option<GeoPoint>,
    pub status: VehicleStatus,
}

impl VehicleUpdate {
    pub fn status(status: VehicleStatus) -> Self {
        Self {
            position: None,
            status,
        }
    }

    pub fn moved(position: GeoPoint, status: VehicleStatus) -> Self {
        Self {
            position: Some(position),
            status,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Interfaz estrecha sobre el almacén de documentos.
pub trait DataStore: Send + Sync {
    fn list_lines(&self) -> BoxFuture<'_, StoreResult<Vec<Line>>>;

    fn get_line<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Line>>>;

    fn find_line_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<Option<Line>>>;

    fn list_pois(&self) -> BoxFuture<'_, StoreResult<Vec<Poi>>>;

    fn get_poi<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Poi>>>;

    fn find_poi_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<Option<Poi>>>;

    fn list_vehicles(&self) -> BoxFuture<'_, StoreResult<Vec<Vehicle>>>;

    fn get_vehicle<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Vehicle>>>;

    /// Vehículos en ruta (ida o vuelta). Con `line_id` filtra por línea.
    fn active_vehicles<'a>(
        &'a self,
        line_id: Option<&'a str>,
    ) -> BoxFuture<'a, StoreResult<Vec<Vehicle>>>;

    fn update_vehicle<'a>(
        &'a self,
        id: &'a str,
        update: VehicleUpdate,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn get_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<RouteProposal>>>;

    /// Aprueba la propuesta: reemplaza el recorrido de la línea y marca la
    /// propuesta como aprobada, todo o nada. Devuelve la línea actualizada.
    fn approve_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Line>>;

    fn reject_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<()>>;
}

/// Ejecuta una operación del almacén con límite de tiempo.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(1)
        };
        let result = with_timeout(Duration::from_millis(100), slow).await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_millis(100))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let fast = async { Ok::<_, StoreError>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), fast).await, Ok(7));
    }
}
