//! Simulador de posiciones: mueve vehículos sobre el recorrido de su línea a
//! distancia fija por tick.
//!
//! [`Simulator`] es el dueño del registro de simulaciones. Cada vehículo tiene
//! a lo sumo una simulación activa: toda operación sobre un vehículo toma su
//! propio candado, cancela la simulación anterior y espera a que termine antes
//! de escribir o lanzar otra.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::geometry::{GeometryError, RouteLine};
use crate::queries::_structs::{Direction, GeoPoint, Line, Vehicle, VehicleStatus};
use crate::store::{with_timeout, DataStore, StoreError, VehicleUpdate, POIS};

pub mod run;

pub use run::{Phase, RunOptions, RunProgress, Step, Stepper};
use run::{drive, RunContext};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Data store error: {0}")]
    Store(#[from] StoreError),
    #[error("Vehicle {0} not found")]
    VehicleNotFound(String),
    #[error("Line {0} not found")]
    LineNotFound(String),
    #[error("Line {line} has no usable {direction} route: {source}")]
    InvalidRoute {
        line: String,
        direction: Direction,
        source: GeometryError,
    },
    #[error("Invalid terminal {0}, expected 1 or 2")]
    InvalidTerminal(u8),
    #[error("No coordinate available for terminal {terminal} of line {line}")]
    TerminalUnavailable { line: String, terminal: u8 },
}

struct ActiveRun {
    handle: JoinHandle<()>,
    progress: watch::Receiver<RunProgress>,
}

type Slot = Arc<Mutex<Option<ActiveRun>>>;

/// Cancela la simulación del slot y espera a que la tarea termine. Devuelve
/// `true` si seguía en curso.
async fn cancel(slot: &mut Option<ActiveRun>) -> bool {
    let Some(run) = slot.take() else {
        return false;
    };
    let was_running = !run.handle.is_finished();
    run.handle.abort();
    // Un JoinError de cancelación es lo esperado
    let _ = run.handle.await;
    was_running
}

pub struct Simulator {
    store: Arc<dyn DataStore>,
    config: SimulatorConfig,
    store_timeout: Duration,
    slots: DashMap<String, Slot>,
}

impl Simulator {
    pub fn new(store: Arc<dyn DataStore>, config: SimulatorConfig, store_timeout: Duration) -> Self {
        Self {
            store,
            config,
            store_timeout,
            slots: DashMap::new(),
        }
    }

    pub fn default_options(&self) -> RunOptions {
        RunOptions {
            auto_return: self.config.auto_return,
            terminal_wait: Duration::from_millis(self.config.terminal_wait_ms),
        }
    }

    /// Slot del vehículo, creándolo si no existe. Sólo se llama para
    /// vehículos ya leídos del almacén.
    fn slot(&self, vehicle_id: &str) -> Slot {
        self.slots
            .entry(vehicle_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Quita el slot si nadie lo está usando y no guarda ninguna simulación.
    fn release_idle(&self, vehicle_id: &str) {
        let removed = self.slots.remove_if(vehicle_id, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().map_or(false, |current| current.is_none())
        });
        if removed.is_some() {
            debug!("Slot of {} released", vehicle_id);
        }
    }

    async fn load_vehicle(&self, vehicle_id: &str) -> Result<Vehicle, SimulationError> {
        with_timeout(self.store_timeout, self.store.get_vehicle(vehicle_id))
            .await?
            .ok_or_else(|| SimulationError::VehicleNotFound(vehicle_id.to_string()))
    }

    async fn load_line(&self, line_id: &str) -> Result<Line, SimulationError> {
        with_timeout(self.store_timeout, self.store.get_line(line_id))
            .await?
            .ok_or_else(|| SimulationError::LineNotFound(line_id.to_string()))
    }

    /// Inicia la simulación de un vehículo en el sentido indicado,
    /// reemplazando la que tuviera en curso.
    pub async fn start(
        &self,
        vehicle_id: &str,
        direction: Direction,
        options: RunOptions,
    ) -> Result<RunProgress, SimulationError> {
        let vehicle = self.load_vehicle(vehicle_id).await?;
        let id = vehicle.id.clone();
        let result = self.start_loaded(vehicle, direction, options).await;
        self.release_idle(&id);
        result
    }

    async fn start_loaded(
        &self,
        vehicle: Vehicle,
        direction: Direction,
        options: RunOptions,
    ) -> Result<RunProgress, SimulationError> {
        let slot = self.slot(&vehicle.id);
        let mut current = slot.lock().await;
        if cancel(&mut current).await {
            debug!("Previous simulation of {} cancelled", vehicle.id);
        }

        let line = self.load_line(&vehicle.line_id).await?;
        let route: RouteLine = line
            .route_line(direction)
            .map_err(|source| SimulationError::InvalidRoute {
                line: line.id.clone(),
                direction,
                source,
            })?;

        let initial = RunProgress {
            vehicle_id: vehicle.id.clone(),
            line_id: line.id.clone(),
            direction,
            phase: Phase::Advancing,
            ticks: 0,
            traveled_km: 0.0,
            route_length_km: route.length_km(),
            diagnostic: None,
        };
        let (progress_tx, progress_rx) = watch::channel(initial.clone());

        let ctx = RunContext {
            store: Arc::clone(&self.store),
            vehicle_id: vehicle.id.clone(),
            line_id: line.id.clone(),
            tick_interval: self.config.tick_interval(),
            step_km: self.config.km_per_tick(),
            store_timeout: self.store_timeout,
            options,
            progress: progress_tx,
        };

        info!(
            "Starting simulation of {} on line {} ({}, {:.3} km)",
            vehicle.id,
            line.id,
            direction,
            route.length_km()
        );
        let handle = tokio::spawn(drive(ctx, direction, route));
        *current = Some(ActiveRun {
            handle,
            progress: progress_rx,
        });

        Ok(initial)
    }

    /// Detiene la simulación (si hay) y escribe el estado final.
    pub async fn stop(
        &self,
        vehicle_id: &str,
        final_status: Option<VehicleStatus>,
    ) -> Result<bool, SimulationError> {
        self.load_vehicle(vehicle_id).await?;
        let result = self.stop_loaded(vehicle_id, final_status).await;
        self.release_idle(vehicle_id);
        result
    }

    async fn stop_loaded(
        &self,
        vehicle_id: &str,
        final_status: Option<VehicleStatus>,
    ) -> Result<bool, SimulationError> {
        let slot = self.slot(vehicle_id);
        let mut current = slot.lock().await;
        let was_running = cancel(&mut current).await;

        let status = final_status.unwrap_or(VehicleStatus::FueraDeServicio);
        with_timeout(
            self.store_timeout,
            self.store
                .update_vehicle(vehicle_id, VehicleUpdate::status(status)),
        )
        .await?;

        info!("Vehicle {} stopped as {}", vehicle_id, status.as_str());
        Ok(was_running)
    }

    /// Coloca el vehículo en la terminal 1 o 2 de su línea. Usa la
    /// coordenada del POI de la terminal o, si no la hay, el extremo
    /// correspondiente del recorrido de ida.
    pub async fn place_at_terminal(
        &self,
        vehicle_id: &str,
        terminal: u8,
    ) -> Result<VehicleStatus, SimulationError> {
        let status = match terminal {
            1 => VehicleStatus::EnTerminal1,
            2 => VehicleStatus::EnTerminal2,
            other => return Err(SimulationError::InvalidTerminal(other)),
        };

        let vehicle = self.load_vehicle(vehicle_id).await?;
        let result = self.place_loaded(&vehicle, terminal, status).await;
        self.release_idle(&vehicle.id);
        result
    }

    async fn place_loaded(
        &self,
        vehicle: &Vehicle,
        terminal: u8,
        status: VehicleStatus,
    ) -> Result<VehicleStatus, SimulationError> {
        let vehicle_id = vehicle.id.as_str();
        let slot = self.slot(vehicle_id);
        let mut current = slot.lock().await;
        cancel(&mut current).await;

        let line = self.load_line(&vehicle.line_id).await?;

        let poi_position = match line.terminal_id(terminal) {
            Some(poi_id) => {
                let poi = with_timeout(self.store_timeout, self.store.get_poi(poi_id)).await?;
                if poi.is_none() {
                    warn!("Terminal {}/{} of line {} not found", POIS, poi_id, line.id);
                }
                poi.and_then(|p| p.coordinate).filter(|c| c.is_valid())
            }
            None => None,
        };

        let position = match poi_position {
            Some(position) => position,
            None => {
                let route = line.route_line(Direction::Ida).map_err(|_| {
                    SimulationError::TerminalUnavailable {
                        line: line.id.clone(),
                        terminal,
                    }
                })?;
                let end = if terminal == 1 { route.first() } else { route.last() };
                GeoPoint::from_coord(end)
            }
        };

        with_timeout(
            self.store_timeout,
            self.store
                .update_vehicle(vehicle_id, VehicleUpdate::moved(position, status)),
        )
        .await?;

        info!("Vehicle {} placed at terminal {}", vehicle_id, terminal);
        Ok(status)
    }

    /// Detiene todas las simulaciones. Los vehículos que estaban en
    /// movimiento quedan fuera de servicio.
    pub async fn stop_all(&self) -> usize {
        let vehicle_ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;

        for vehicle_id in vehicle_ids {
            let Some(slot) = self.slots.get(&vehicle_id).map(|e| e.value().clone()) else {
                continue;
            };
            let mut current = slot.lock().await;
            let was_running = cancel(&mut current).await;
            drop(current);
            drop(slot);
            self.release_idle(&vehicle_id);
            if !was_running {
                continue;
            }
            stopped += 1;
            let reset = with_timeout(
                self.store_timeout,
                self.store.update_vehicle(
                    &vehicle_id,
                    VehicleUpdate::status(VehicleStatus::FueraDeServicio),
                ),
            )
            .await;
            if let Err(e) = reset {
                warn!("Could not reset vehicle {}: {}", vehicle_id, e);
            }
        }

        info!("Stopped {} simulations", stopped);
        stopped
    }

    /// Cancela el lanzador de la flota, espera a que termine y luego detiene
    /// todas las simulaciones.
    pub async fn shutdown<T>(&self, launcher: JoinHandle<T>) -> usize {
        launcher.abort();
        // Un JoinError de cancelación es lo esperado
        let _ = launcher.await;
        self.stop_all().await
    }

    /// Lanza la flota de forma escalonada: un vehículo cada
    /// `dispatch_delay_ms`. Se omiten los que ya están en ruta o simulándose;
    /// los que están en la terminal 2 salen de vuelta. Devuelve los lanzados.
    pub async fn start_fleet(&self, line_id: Option<&str>) -> Result<Vec<String>, SimulationError> {
        let vehicles = with_timeout(self.store_timeout, self.store.list_vehicles()).await?;
        let delay = Duration::from_millis(self.config.dispatch_delay_ms);
        let mut launched = Vec::new();

        for vehicle in vehicles
            .iter()
            .filter(|v| line_id.map_or(true, |id| v.line_id == id))
        {
            if vehicle.status.is_en_route() || self.is_running(&vehicle.id) {
                debug!("Vehicle {} already running, skipped", vehicle.id);
                continue;
            }

            let direction = if vehicle.status == VehicleStatus::EnTerminal2 {
                Direction::Vuelta
            } else {
                Direction::Ida
            };

            if !launched.is_empty() {
                tokio::time::sleep(delay).await;
            }

            match self.start(&vehicle.id, direction, self.default_options()).await {
                Ok(_) => launched.push(vehicle.id.clone()),
                Err(e) => warn!("Vehicle {} not launched: {}", vehicle.id, e),
            }
        }

        info!("Fleet launch finished: {} vehicles", launched.len());
        Ok(launched)
    }

    /// `true` si el vehículo tiene una simulación viva (o una operación en
    /// curso sobre su slot).
    pub fn is_running(&self, vehicle_id: &str) -> bool {
        let Some(slot) = self.slots.get(vehicle_id).map(|e| e.value().clone()) else {
            return false;
        };
        slot.try_lock().map_or(true, |current| {
            current
                .as_ref()
                .map_or(false, |run| !run.handle.is_finished())
        })
    }

    /// Estado de las simulaciones conocidas, ordenado por vehículo.
    pub fn runs(&self) -> Vec<RunProgress> {
        let mut runs: Vec<RunProgress> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let current = entry.value().try_lock().ok()?;
                current.as_ref().map(|run| run.progress.borrow().clone())
            })
            .collect();
        runs.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        runs
    }
}
