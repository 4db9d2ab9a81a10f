use geo::Coord;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::geometry::{point_at_distance, RouteLine};
use crate::queries::_structs::{Direction, GeoPoint, VehicleStatus};
use crate::store::{with_timeout, DataStore, StoreError, VehicleUpdate};

/// Margen para comparar la distancia recorrida con el largo del recorrido.
const ARRIVAL_EPSILON_KM: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Advancing,
    Arrived,
}

/// Estado observable de una simulación.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub vehicle_id: String,
    pub line_id: String,
    pub direction: Direction,
    pub phase: Phase,
    pub ticks: u32,
    pub traveled_km: f64,
    pub route_length_km: f64,
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Advanced(Coord<f64>),
    /// Llegó al final; la posición es exactamente el último punto.
    Arrived(Coord<f64>),
}

/// Avance por distancia fija sobre un recorrido.
///
/// La distancia recorrida se calcula como `ticks * step_km` para no
/// acumular error de redondeo.
#[derive(Debug)]
pub struct Stepper<'a> {
    route: &'a RouteLine,
    step_km: f64,
    ticks: u32,
}

impl<'a> Stepper<'a> {
    pub fn new(route: &'a RouteLine, step_km: f64) -> Self {
        Self {
            route,
            step_km,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn traveled_km(&self) -> f64 {
        (self.ticks as f64 * self.step_km).min(self.route.length_km())
    }

    pub fn position(&self) -> Coord<f64> {
        point_at_distance(self.route, self.traveled_km())
    }

    pub fn tick(&mut self) -> Step {
        self.ticks += 1;
        let traveled = self.ticks as f64 * self.step_km;
        if traveled + ARRIVAL_EPSILON_KM >= self.route.length_km() {
            Step::Arrived(self.route.last())
        } else {
            Step::Advanced(point_at_distance(self.route, traveled))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub auto_return: bool,
    pub terminal_wait: Duration,
}

/// Todo lo que necesita la tarea de una simulación.
pub(crate) struct RunContext {
    pub store: Arc<dyn DataStore>,
    pub vehicle_id: String,
    pub line_id: String,
    pub tick_interval: Duration,
    pub step_km: f64,
    pub store_timeout: Duration,
    pub options: RunOptions,
    pub progress: watch::Sender<RunProgress>,
}

impl RunContext {
    async fn write(&self, position: Coord<f64>, status: VehicleStatus) -> Result<(), StoreError> {
        let update = VehicleUpdate::moved(GeoPoint::from_coord(position), status);
        with_timeout(
            self.store_timeout,
            self.store.update_vehicle(&self.vehicle_id, update),
        )
        .await
    }

    fn publish(&self, stepper: &Stepper<'_>, phase: Phase) {
        let ticks = stepper.ticks();
        let traveled_km = stepper.traveled_km();
        self.progress.send_modify(|p| {
            p.phase = phase;
            p.ticks = ticks;
            p.traveled_km = traveled_km;
        });
    }

    fn finish(&self, diagnostic: Option<String>) {
        self.progress.send_modify(|p| {
            p.phase = Phase::Idle;
            p.diagnostic = diagnostic;
        });
    }

    /// Recorre `route` de principio a fin escribiendo cada posición.
    async fn advance(&self, direction: Direction, route: &RouteLine) -> Result<(), StoreError> {
        self.progress.send_modify(|p| {
            p.direction = direction;
            p.route_length_km = route.length_km();
        });

        let mut stepper = Stepper::new(route, self.step_km);
        self.write(stepper.position(), direction.en_route_status())
            .await?;
        self.publish(&stepper, Phase::Advancing);

        loop {
            tokio::time::sleep(self.tick_interval).await;
            match stepper.tick() {
                Step::Advanced(position) => {
                    self.write(position, direction.en_route_status()).await?;
                    self.publish(&stepper, Phase::Advancing);
                }
                Step::Arrived(position) => {
                    self.write(position, direction.arrival_status()).await?;
                    self.publish(&stepper, Phase::Arrived);
                    info!(
                        "Vehicle {} arrived ({}) after {} ticks",
                        self.vehicle_id,
                        direction,
                        stepper.ticks()
                    );
                    return Ok(());
                }
            }
        }
    }

    async fn load_route(&self, direction: Direction) -> Result<RouteLine, String> {
        let line = with_timeout(self.store_timeout, self.store.get_line(&self.line_id))
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("line {} not found", self.line_id))?;
        line.route_line(direction)
            .map_err(|e| format!("line {} has no usable {} route: {}", self.line_id, direction, e))
    }

    /// Tras un fallo de escritura el vehículo queda fuera de servicio.
    async fn fail(&self, cause: StoreError) {
        error!("Simulation of {} stopped: {}", self.vehicle_id, cause);
        let reset = with_timeout(
            self.store_timeout,
            self.store.update_vehicle(
                &self.vehicle_id,
                VehicleUpdate::status(VehicleStatus::FueraDeServicio),
            ),
        )
        .await;
        if let Err(e) = reset {
            error!("Could not reset vehicle {}: {}", self.vehicle_id, e);
        }
        self.finish(Some(format!("position write failed: {}", cause)));
    }
}

/// Tarea de una simulación: avanzar, esperar en terminal y, si corresponde,
/// volver en sentido contrario. Termina cuando no hay retorno posible o al
/// ser abortada.
pub(crate) async fn drive(ctx: RunContext, mut direction: Direction, mut route: RouteLine) {
    loop {
        if let Err(e) = ctx.advance(direction, &route).await {
            ctx.fail(e).await;
            return;
        }

        if !ctx.options.auto_return {
            ctx.finish(None);
            return;
        }

        debug!(
            "Vehicle {} waiting {:?} at terminal",
            ctx.vehicle_id, ctx.options.terminal_wait
        );
        tokio::time::sleep(ctx.options.terminal_wait).await;

        let next = direction.opposite();
        match ctx.load_route(next).await {
            Ok(next_route) => {
                direction = next;
                route = next_route;
            }
            Err(diagnostic) => {
                warn!("Vehicle {} stays at terminal: {}", ctx.vehicle_id, diagnostic);
                ctx.finish(Some(diagnostic));
                return;
            }
        }
    }
}
