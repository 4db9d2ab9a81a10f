use futures::future::join_all;
use geo::Coord;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{ChatError, Chatbot};
use crate::queries::_structs::CandidateMatch;
use crate::queries::{find_candidates, find_nearest_stop, find_routes_near_point, vehicles_near_point, NearbyVehicle};
use crate::store::with_timeout;

/// Mensaje de alerta de proximidad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    #[serde(rename = "mensaje")]
    pub message: String,
}

const NO_NEARBY_BUSES: &str = "No hay buses cercanos por ahora, te avisaremos cuando uno se acerque.";

/// Respuesta de plantilla para una búsqueda con llegadas.
fn route_fallback(destination: &str, results: &[&CandidateMatch]) -> String {
    let mut text = format!("Para ir a \"{}\":", destination);
    for candidate in results {
        if let Some(eta) = candidate.best_eta() {
            text.push_str(&format!(
                "\n- {}: pasa a {}m del destino y llega en aprox. {} min.",
                candidate.route_name,
                candidate.distance_to_destination_m(),
                eta
            ));
        }
    }
    text
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

impl Chatbot {
    /// Líneas que llevan al destino, con la llegada más próxima de cada una.
    pub async fn route_to_destination(
        &self,
        destination: &str,
        user: Coord<f64>,
    ) -> Result<String, ChatError> {
        let poi = with_timeout(self.timeout(), self.store.find_poi_by_name(destination)).await?;
        let Some(poi) = poi else {
            return Ok(format!("No encontré \"{}\" en nuestra base de datos.", destination));
        };
        let Some(target) = poi.coordinate.filter(|c| c.is_valid()) else {
            return Ok(format!(
                "No hay coordenadas válidas para \"{}\" en la base de datos.",
                destination
            ));
        };

        let candidates =
            find_candidates(self.store.as_ref(), target.to_coord(), user, &self.search).await?;
        if candidates.is_empty() {
            return Ok(format!("No encontré líneas que pasen cerca de \"{}\".", destination));
        }

        let with_eta: Vec<&CandidateMatch> =
            candidates.iter().filter(|c| c.best_eta().is_some()).collect();
        if with_eta.is_empty() {
            return Ok(format!(
                "Encontré las siguientes líneas cerca de \"{}\", pero no hay buses activos en este momento en ruta hacia tu ubicación.",
                destination
            ));
        }

        let results: Vec<_> = with_eta
            .iter()
            .map(|c| {
                json!({
                    "nombreLinea": c.route_name,
                    "distanciaADestino": c.distance_to_destination_m(),
                    "etaMinutos": c.best_eta(),
                })
            })
            .collect();
        let data = json!({
            "destino": destination,
            "ubicacionUsuario": { "lat": user.y, "lng": user.x },
            "resultados": results,
        });
        let prompt = format!(
            "Eres un asistente de transporte que SOLO debe usar la INFORMACIÓN proporcionada a continuación (datos provenientes de la base de datos).\n\
             No inventes nada. Responde en 1-2 frases, siendo claro y directo.\n\
             \n\
             DATOS:\n{}\n\
             \n\
             Formatea la respuesta en lenguaje natural (español), concisa.",
            pretty(&data)
        );

        Ok(self
            .phrase(&prompt, route_fallback(destination, &with_eta))
            .await)
    }

    /// Datos descriptivos de una línea.
    pub async fn line_info(&self, name: &str) -> Result<String, ChatError> {
        let line = with_timeout(self.timeout(), self.store.find_line_by_name(name)).await?;
        let Some(line) = line else {
            return Ok(format!("No encontré información para la línea \"{}\".", name));
        };

        let data = json!({
            "nombre": line.name,
            "descripcion": line.description,
            "horarios": line.schedule,
            "origen": line.origin,
            "destino": line.destination,
        });
        let prompt = format!(
            "Usa SOLO estos datos (no inventes). Haz una respuesta corta en español describiendo la línea:\n{}",
            pretty(&data)
        );
        let fallback = format!(
            "Línea {}. {}",
            line.name,
            line.description
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or("No hay descripción disponible.")
        );

        Ok(self.phrase(&prompt, fallback).await)
    }

    /// Datos de un lugar y las líneas que pasan cerca de él.
    pub async fn place_info(&self, name: &str) -> Result<String, ChatError> {
        let poi = with_timeout(self.timeout(), self.store.find_poi_by_name(name)).await?;
        let Some(poi) = poi else {
            return Ok(format!("No encontré información registrada para \"{}\".", name));
        };

        let nearby = match poi.coordinate.filter(|c| c.is_valid()) {
            Some(coordinate) => {
                let lines = with_timeout(self.timeout(), self.store.list_lines()).await?;
                find_routes_near_point(coordinate.to_coord(), self.search.max_distance_km, &lines)
            }
            None => Vec::new(),
        };
        let nearby_lines: Vec<_> = nearby
            .iter()
            .map(|r| {
                json!({
                    "nombre": r.line.display_name(),
                    "distanciaM": (r.distance_km * 1000.0).round() as u32,
                })
            })
            .collect();

        let data = json!({
            "nombre": poi.name,
            "descripcion": poi.description,
            "patrocinado": poi.sponsored,
            "lineasCercanas": nearby_lines,
        });
        let prompt = format!(
            "Usa SOLO estos datos (no inventes). Describe brevemente en español el lugar y qué líneas pasan cerca:\n{}",
            pretty(&data)
        );

        let description = poi
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("No hay descripción disponible.");
        let lines_text = if nearby.is_empty() {
            "No hay líneas que pasen cerca.".to_string()
        } else {
            let listed: Vec<String> = nearby
                .iter()
                .map(|r| {
                    format!(
                        "{} (a {} m)",
                        r.line.display_name(),
                        (r.distance_km * 1000.0).round() as u32
                    )
                })
                .collect();
            format!("Líneas que pasan cerca: {}.", listed.join(", "))
        };
        let fallback = format!("{}. {} {}", poi.name, description, lines_text);

        Ok(self.phrase(&prompt, fallback).await)
    }

    /// Punto de abordaje más cercano al usuario.
    pub async fn nearest_stop(&self, user: Coord<f64>) -> Result<String, ChatError> {
        let lines = with_timeout(self.timeout(), self.store.list_lines()).await?;
        let Some(stop) = find_nearest_stop(user, &lines) else {
            return Ok("No encontré un paradero cercano en las rutas disponibles.".to_string());
        };

        let prompt = format!(
            "Devuelve 1-2 frases en español usando SOLO estos datos:\n\
             Paradero estimado en la línea: {}\n\
             Distancia aprox: {} m\n\
             Coordenadas del punto: lat={}, lng={}",
            stop.line_name,
            stop.distance_m(),
            stop.point.latitude,
            stop.point.longitude
        );
        let fallback = format!(
            "Paradero cercano en {}, a {} m.",
            stop.line_name,
            stop.distance_m()
        );

        Ok(self.phrase(&prompt, fallback).await)
    }

    async fn alert_for(&self, vehicle: &NearbyVehicle) -> Alert {
        let line_name = match with_timeout(self.timeout(), self.store.get_line(&vehicle.line_id)).await {
            Ok(Some(line)) => line.display_name().to_string(),
            Ok(None) => "una línea desconocida".to_string(),
            Err(e) => {
                warn!("Could not load line {}: {}", vehicle.line_id, e);
                "una línea desconocida".to_string()
            }
        };

        let prompt = format!(
            "Genera una alerta corta y natural (máximo 1 frase) informando al pasajero que un vehículo de la línea {} está cerca (a {} metros).\n\
             Responde solo con texto.",
            line_name,
            vehicle.distance_m()
        );
        let fallback = format!(
            "Un bus de la línea {} está a {} metros de ti.",
            line_name,
            vehicle.distance_m()
        );

        Alert {
            message: self.phrase(&prompt, fallback).await,
        }
    }

    /// Una alerta por cada vehículo en ruta dentro del radio de alerta. Si
    /// no hay ninguno, una sola alerta avisando que no hay buses cerca.
    pub async fn proximity_alerts(&self, user: Coord<f64>) -> Result<Vec<Alert>, ChatError> {
        let vehicles = with_timeout(self.timeout(), self.store.active_vehicles(None)).await?;
        let nearby = vehicles_near_point(user, self.alert_radius_km, &vehicles);
        debug!("{} vehicles within {} km", nearby.len(), self.alert_radius_km);

        if nearby.is_empty() {
            let prompt = format!(
                "No se detectaron buses cercanos en la ubicación ({:.4}, {:.4}).\n\
                 Genera una alerta breve y amable tipo: \"{}\"",
                user.y, user.x, NO_NEARBY_BUSES
            );
            let message = self.phrase(&prompt, NO_NEARBY_BUSES.to_string()).await;
            return Ok(vec![Alert { message }]);
        }

        Ok(join_all(nearby.iter().map(|v| self.alert_for(v))).await)
    }
}
