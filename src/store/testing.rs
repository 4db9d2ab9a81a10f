//! Almacén con fallos inyectables para pruebas.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{DataStore, MemoryStore, StoreError, StoreResult, VehicleUpdate};
use crate::queries::_structs::{Line, Poi, RouteProposal, Vehicle};

pub struct FaultyStore {
    pub inner: MemoryStore,
    /// Todas las lecturas de líneas fallan.
    pub lines_unavailable: AtomicBool,
    /// El listado de líneas nunca termina.
    pub stall_lines: AtomicBool,
    /// Las consultas de vehículos activos nunca terminan.
    pub stall_active_vehicles: AtomicBool,
    /// Escrituras con posición que se aceptan antes de empezar a fallar.
    pub position_writes_left: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            lines_unavailable: AtomicBool::new(false),
            stall_lines: AtomicBool::new(false),
            stall_active_vehicles: AtomicBool::new(false),
            position_writes_left: AtomicUsize::new(usize::MAX),
        }
    }

    fn lines_down(&self) -> bool {
        self.lines_unavailable.load(Ordering::SeqCst)
    }
}

fn unavailable<T: Send + 'static>() -> BoxFuture<'static, StoreResult<T>> {
    async { Err(StoreError::Unavailable("injected failure".to_string())) }.boxed()
}

impl DataStore for FaultyStore {
    fn list_lines(&self) -> BoxFuture<'_, StoreResult<Vec<Line>>> {
        if self.lines_down() {
            return unavailable();
        }
        if self.stall_lines.load(Ordering::SeqCst) {
            return futures::future::pending().boxed();
        }
        self.inner.list_lines()
    }

    fn get_line<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Line>>> {
        if self.lines_down() {
            return unavailable();
        }
        self.inner.get_line(id)
    }

    fn find_line_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<Option<Line>>> {
        if self.lines_down() {
            return unavailable();
        }
        self.inner.find_line_by_name(name)
    }

    fn list_pois(&self) -> BoxFuture<'_, StoreResult<Vec<Poi>>> {
        self.inner.list_pois()
    }

    fn get_poi<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Poi>>> {
        self.inner.get_poi(id)
    }

    fn find_poi_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<Option<Poi>>> {
        self.inner.find_poi_by_name(name)
    }

    fn list_vehicles(&self) -> BoxFuture<'_, StoreResult<Vec<Vehicle>>> {
        self.inner.list_vehicles()
    }

    fn get_vehicle<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<Vehicle>>> {
        self.inner.get_vehicle(id)
    }

    fn active_vehicles<'a>(
        &'a self,
        line_id: Option<&'a str>,
    ) -> BoxFuture<'a, StoreResult<Vec<Vehicle>>> {
        if self.stall_active_vehicles.load(Ordering::SeqCst) {
            return futures::future::pending().boxed();
        }
        self.inner.active_vehicles(line_id)
    }

    fn update_vehicle<'a>(
        &'a self,
        id: &'a str,
        update: VehicleUpdate,
    ) -> BoxFuture<'a, StoreResult<()>> {
        if update.position.is_some() {
            let allowed = self
                .position_writes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if !allowed {
                return unavailable();
            }
        }
        self.inner.update_vehicle(id, update)
    }

    fn get_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Option<RouteProposal>>> {
        self.inner.get_proposal(id)
    }

    fn approve_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<Line>> {
        self.inner.approve_proposal(id)
    }

    fn reject_proposal<'a>(&'a self, id: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        self.inner.reject_proposal(id)
    }
}
