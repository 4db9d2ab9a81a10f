use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::data_loader::{Collections, DataLoader, LoaderError};
use super::{DataStore, StoreError, StoreResult, VehicleUpdate, LINES, PROPOSALS, VEHICLES};
use crate::geometry::RouteLine;
use crate::queries::_structs::{Direction, Line, Poi, ProposalStatus, RouteProposal, Vehicle};

/// Almacén de documentos en memoria.
///
/// Todas las escrituras toman el mismo candado, así que la aprobación de una
/// propuesta (línea + propuesta) es atómica frente a cualquier lector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new(collections: Collections) -> Self {
        Self {
            data: RwLock::new(collections),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoaderError> {
        Ok(Self::new(DataLoader::new(path).load_all()?))
    }

    /// Copia del contenido actual.
    pub async fn snapshot(&self) -> Collections {
        self.data.read().await.clone()
    }

    pub async fn insert_line(&self, line: Line) {
        self.data.write().await.lines.insert(line.id.clone(), line);
    }

    pub async fn insert_vehicle(&self, vehicle: Vehicle) {
        self.data
            .write()
            .await
            .vehicles
            .insert(vehicle.id.clone(), vehicle);
    }

    pub async fn insert_poi(&self, poi: Poi) {
        self.data.write().await.pois.insert(poi.id.clone(), poi);
    }

    pub async fn insert_proposal(&self, proposal: RouteProposal) {
        self.data
            .write()
            .await
            .proposals
            .insert(proposal.id.clone(), proposal);
    }
}

impl DataStore for MemoryStore {
    fn list_lines(&self) -> BoxFuture<'_, StoreResult<Vec<Line>>> {
        async move { Ok(self.data.read().await.lines.values().cloned().collect()) }.boxed()
    }

    fn get_line<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Line>>> {
        async move { Ok(self.data.read().await.lines.get(id).cloned()) }.boxed()
    }

    fn find_line_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<Option<Line>>> {
        async move {
            Ok(self
                .data
                .read()
                .await
                .lines
                .values()
                .find(|l| l.name == name)
                .cloned())
        }
        .boxed()
    }

    fn list_pois(&self) -> BoxFuture<'_, StoreResult<Vec<Poi>>> {
        async move { Ok(self.data.read().await.pois.values().cloned().collect()) }.boxed()
    }

    fn get_poi<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Poi>>> {
        async move { Ok(self.data.read().await.pois.get(id).cloned()) }.boxed()
    }

    fn find_poi_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<Option<Poi>>> {
        async move {
            Ok(self
                .data
                .read()
                .await
                .pois
                .values()
                .find(|p| p.name == name)
                .cloned())
        }
        .boxed()
    }

    fn list_vehicles(&self) -> BoxFuture<'_, StoreResult<Vec<Vehicle>>> {
        async move { Ok(self.data.read().await.vehicles.values().cloned().collect()) }.boxed()
    }

    fn get_vehicle<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Vehicle>>> {
        async move { Ok(self.data.read().await.vehicles.get(id).cloned()) }.boxed()
    }

    fn active_vehicles<'a>(
        &'a self,
        line_id: Option<&'a str>,
    ) -> BoxFuture<'a, StoreResult<Vec<Vehicle>>> {
        async move {
            Ok(self
                .data
                .read()
                .await
                .vehicles
                .values()
                .filter(|v| v.status.is_en_route())
                .filter(|v| line_id.map_or(true, |id| v.line_id == id))
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn update_vehicle<'a>(
        &'a self,
        id: &'a str,
        update: VehicleUpdate,
    ) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            let mut data = self.data.write().await;
            let vehicle = data.vehicles.get_mut(id).ok_or_else(|| StoreError::NotFound {
                collection: VEHICLES,
                id: id.to_string(),
            })?;

            if let Some(position) = update.position {
                vehicle.current_position = Some(position);
            }
            vehicle.status = update.status;
            vehicle.last_update = Some(Utc::now());
            debug!("Vehicle {} -> {}", id, update.status.as_str());
            Ok(())
        }
        .boxed()
    }

    fn get_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<RouteProposal>>> {
        async move { Ok(self.data.read().await.proposals.get(id).cloned()) }.boxed()
    }

    fn approve_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Line>> {
        async move {
            let mut data = self.data.write().await;

            // Validar todo antes de escribir nada
            let proposal = data.proposals.get(id).cloned().ok_or_else(|| StoreError::NotFound {
                collection: PROPOSALS,
                id: id.to_string(),
            })?;
            let invalid = |reason: &str| StoreError::InvalidProposal {
                id: id.to_string(),
                reason: reason.to_string(),
            };
            if let Err(e) = RouteLine::from_lat_lng(
                proposal
                    .recorded_points
                    .iter()
                    .map(|p| (p.latitude, p.longitude)),
            ) {
                return Err(invalid(&e.to_string()));
            }
            let direction = proposal
                .direction
                .ok_or_else(|| invalid("missing direction"))?;
            if !data.lines.contains_key(&proposal.line_id) {
                return Err(StoreError::NotFound {
                    collection: LINES,
                    id: proposal.line_id.clone(),
                });
            }

            let line = data
                .lines
                .get_mut(&proposal.line_id)
                .ok_or_else(|| invalid("line disappeared"))?;
            match direction {
                Direction::Ida => line.outbound_points = proposal.recorded_points.clone(),
                Direction::Vuelta => line.inbound_points = proposal.recorded_points.clone(),
            }
            let updated = line.clone();

            if let Some(stored) = data.proposals.get_mut(id) {
                stored.status = ProposalStatus::Aprobada;
            }

            info!(
                "Proposal {} approved: line {} ({}) now has {} points",
                id,
                updated.id,
                direction,
                proposal.recorded_points.len()
            );
            Ok(updated)
        }
        .boxed()
    }

    fn reject_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            let mut data = self.data.write().await;
            let proposal = data.proposals.get_mut(id).ok_or_else(|| StoreError::NotFound {
                collection: PROPOSALS,
                id: id.to_string(),
            })?;
            proposal.status = ProposalStatus::Rechazada;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::_structs::{GeoPoint, VehicleStatus};
    use tokio_test::{assert_err, assert_ok};

    fn store() -> MemoryStore {
        let mut collections = Collections::default();
        collections.lines.insert(
            "l1".into(),
            Line {
                id: "l1".into(),
                name: "Línea 1".into(),
                outbound_points: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.01, 0.0)],
                ..Default::default()
            },
        );
        for (id, status) in [
            ("v1", VehicleStatus::EnRutaIda),
            ("v2", VehicleStatus::FueraDeServicio),
            ("v3", VehicleStatus::EnRutaVuelta),
        ] {
            collections.vehicles.insert(
                id.into(),
                Vehicle {
                    id: id.into(),
                    line_id: if id == "v3" { "l2".into() } else { "l1".into() },
                    status,
                    ..Default::default()
                },
            );
        }
        MemoryStore::new(collections)
    }

    #[tokio::test]
    async fn test_active_vehicles_filters() {
        let store = store();
        assert_eq!(store.active_vehicles(None).await.unwrap().len(), 2);
        let l1 = store.active_vehicles(Some("l1")).await.unwrap();
        assert_eq!(l1.len(), 1);
        assert_eq!(l1[0].id, "v1");
    }

    #[tokio::test]
    async fn test_update_vehicle() {
        let store = store();
        assert_ok!(
            store
                .update_vehicle(
                    "v2",
                    VehicleUpdate::moved(GeoPoint::new(1.0, 2.0), VehicleStatus::EnTerminal1),
                )
                .await
        );
        let v2 = assert_ok!(store.get_vehicle("v2").await).unwrap();
        assert_eq!(v2.status, VehicleStatus::EnTerminal1);
        assert_eq!(v2.current_position, Some(GeoPoint::new(1.0, 2.0)));
        assert!(v2.last_update.is_some());

        let missing = assert_err!(
            store
                .update_vehicle("nope", VehicleUpdate::status(VehicleStatus::FueraDeServicio))
                .await
        );
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_approve_proposal_replaces_route() {
        let store = store();
        let recorded = vec![
            GeoPoint::new(0.01, 0.0),
            GeoPoint::new(0.005, 0.001),
            GeoPoint::new(0.0, 0.0),
        ];
        store
            .insert_proposal(RouteProposal {
                id: "p1".into(),
                line_id: "l1".into(),
                direction: Some(Direction::Vuelta),
                recorded_points: recorded.clone(),
                ..Default::default()
            })
            .await;

        let line = store.approve_proposal("p1").await.unwrap();
        assert_eq!(line.inbound_points, recorded);
        assert_eq!(line.outbound_points.len(), 2);

        let proposal = store.get_proposal("p1").await.unwrap().unwrap();
        assert_eq!(proposal.status, ProposalStatus::Aprobada);
    }

    #[tokio::test]
    async fn test_failed_approval_writes_nothing() {
        let store = store();
        store
            .insert_proposal(RouteProposal {
                id: "empty".into(),
                line_id: "l1".into(),
                direction: Some(Direction::Ida),
                ..Default::default()
            })
            .await;
        store
            .insert_proposal(RouteProposal {
                id: "orphan".into(),
                line_id: "ghost".into(),
                direction: Some(Direction::Ida),
                recorded_points: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)],
                ..Default::default()
            })
            .await;

        assert!(matches!(
            store.approve_proposal("empty").await,
            Err(StoreError::InvalidProposal { .. })
        ));
        assert!(matches!(
            store.approve_proposal("orphan").await,
            Err(StoreError::NotFound { collection: LINES, .. })
        ));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.proposals["empty"].status, ProposalStatus::Pendiente);
        assert_eq!(snapshot.proposals["orphan"].status, ProposalStatus::Pendiente);
        assert_eq!(snapshot.lines["l1"].outbound_points.len(), 2);
    }

    #[tokio::test]
    async fn test_approval_rejects_unusable_geometry() {
        let store = store();
        let proposals = [
            ("single", vec![GeoPoint::new(0.0, 0.0)]),
            ("repeated", vec![GeoPoint::new(0.0, 0.0); 3]),
            (
                "nan",
                vec![GeoPoint::new(f64::NAN, 0.0), GeoPoint::new(0.01, 0.0)],
            ),
            (
                "out_of_range",
                vec![GeoPoint::new(200.0, 0.0), GeoPoint::new(0.01, 0.0)],
            ),
        ];
        for (id, points) in proposals.clone() {
            store
                .insert_proposal(RouteProposal {
                    id: id.into(),
                    line_id: "l1".into(),
                    direction: Some(Direction::Ida),
                    recorded_points: points,
                    ..Default::default()
                })
                .await;
        }

        for (id, _) in proposals {
            let err = assert_err!(store.approve_proposal(id).await);
            assert!(matches!(err, StoreError::InvalidProposal { .. }), "{}", id);
        }

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.lines["l1"].outbound_points.len(), 2);
        assert!(snapshot.lines["l1"].route_line(Direction::Ida).is_ok());
        assert_eq!(snapshot.proposals["single"].status, ProposalStatus::Pendiente);
    }

    #[tokio::test]
    async fn test_reject_proposal() {
        let store = store();
        store
            .insert_proposal(RouteProposal {
                id: "p".into(),
                line_id: "l1".into(),
                ..Default::default()
            })
            .await;
        assert_ok!(store.reject_proposal("p").await);
        assert_eq!(
            store.get_proposal("p").await.unwrap().unwrap().status,
            ProposalStatus::Rechazada
        );
    }
}
