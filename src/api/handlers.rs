use actix_web::{web, HttpResponse};
use geo::Coord;
use geojson::{Feature, Geometry, JsonObject};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::geometry::{coord_from_lat_lng, slice_route_by_distance};
use crate::queries::_structs::{Direction, VehicleStatus};
use crate::simulator::RunOptions;
use crate::store::with_timeout;

/// Interpreta `ubicacionUsuario` como coordenada válida.
fn user_location(body: &Value) -> Result<Coord<f64>, ApiError> {
    let location = body
        .get("ubicacionUsuario")
        .filter(|v| v.is_object())
        .ok_or_else(|| ApiError::BadRequest("Missing or invalid 'ubicacionUsuario'".into()))?;
    let (Some(lat), Some(lng)) = (
        location.get("lat").and_then(Value::as_f64),
        location.get("lng").and_then(Value::as_f64),
    ) else {
        return Err(ApiError::BadRequest(
            "ubicacionUsuario must include numeric 'lat' and 'lng'".into(),
        ));
    };
    coord_from_lat_lng(lat, lng).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn json_object(body: &[u8]) -> Result<Value, ApiError> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .filter(Value::is_object)
        .ok_or_else(|| ApiError::BadRequest("Body must be an object".into()))
}

/// Cuerpo tipado; un cuerpo vacío equivale a `{}`.
fn typed_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw).map_err(|e| ApiError::BadRequest(format!("Invalid body: {}", e)))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

pub async fn chatbot(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let body = json_object(&body)?;
    let question = body
        .get("preguntaUsuario")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing or invalid 'preguntaUsuario'".into()))?;
    let user = user_location(&body)?;

    let bot = state.chatbot()?;
    log::info!("Chatbot question: {}", question);
    let answer = bot.answer(question, user).await?;
    Ok(HttpResponse::Ok().json(json!({ "respuestaBot": answer })))
}

pub async fn alerts(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let body = json_object(&body)?;
    let user = user_location(&body)?;

    let bot = state.chatbot()?;
    let alerts = bot.proximity_alerts(user).await?;
    Ok(HttpResponse::Ok().json(json!({ "alertas": alerts })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    direccion: Direction,
    auto_retorno: Option<bool>,
    espera_terminal_ms: Option<u64>,
}

pub async fn start_simulation(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let vehicle_id = path.into_inner();
    let request: StartRequest = typed_body(&body)?;
    let simulator = state.simulator()?;

    let defaults = simulator.default_options();
    let options = RunOptions {
        auto_return: request.auto_retorno.unwrap_or(defaults.auto_return),
        terminal_wait: request
            .espera_terminal_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(defaults.terminal_wait),
    };
    let progress = simulator.start(&vehicle_id, request.direccion, options).await?;
    Ok(HttpResponse::Ok().json(progress))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest {
    estado_final: Option<VehicleStatus>,
}

pub async fn stop_simulation(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let vehicle_id = path.into_inner();
    let request: StopRequest = typed_body(&body)?;
    let was_running = state
        .simulator()?
        .stop(&vehicle_id, request.estado_final)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "vehiculoId": vehicle_id,
        "estabaActivo": was_running,
    })))
}

#[derive(Debug, Deserialize)]
struct TerminalRequest {
    terminal: u8,
}

pub async fn place_at_terminal(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let vehicle_id = path.into_inner();
    let request: TerminalRequest = typed_body(&body)?;
    let status = state
        .simulator()?
        .place_at_terminal(&vehicle_id, request.terminal)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "vehiculoId": vehicle_id,
        "estado": status,
    })))
}

pub async fn list_runs(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let runs = state.simulator()?.runs();
    Ok(HttpResponse::Ok().json(json!({ "simulaciones": runs })))
}

pub async fn approve_proposal(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store()?;
    let line = with_timeout(state.store_timeout(), store.approve_proposal(&id)).await?;
    log::info!("Proposal {} approved for line {}", id, line.id);
    Ok(HttpResponse::Ok().json(json!({
        "propuestaId": id,
        "estadoPropuesta": "aprobada",
        "linea": line,
    })))
}

pub async fn reject_proposal(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let store = state.store()?;
    with_timeout(state.store_timeout(), store.reject_proposal(&id)).await?;
    log::info!("Proposal {} rejected", id);
    Ok(HttpResponse::Ok().json(json!({
        "propuestaId": id,
        "estadoPropuesta": "rechazada",
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceQuery {
    direccion: Option<Direction>,
    desde_km: Option<f64>,
    hasta_km: Option<f64>,
}

pub async fn line_slice(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<SliceQuery>,
) -> Result<HttpResponse, ApiError> {
    let line_id = path.into_inner();
    let store = state.store()?;
    let line = with_timeout(state.store_timeout(), store.get_line(&line_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Line {} not found", line_id)))?;

    let direction = query.direccion.unwrap_or(Direction::Ida);
    let route = line
        .route_line(direction)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let slice = slice_route_by_distance(
        &route,
        query.desde_km.unwrap_or(0.0),
        query.hasta_km.unwrap_or_else(|| route.length_km()),
    );

    let mut properties = JsonObject::new();
    properties.insert("lineaId".into(), json!(line.id));
    properties.insert("direccion".into(), json!(direction));
    properties.insert("desdeKm".into(), json!(slice.start_km));
    properties.insert("hastaKm".into(), json!(slice.end_km));
    properties.insert("longitudKm".into(), json!(slice.length_km));

    let feature = Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(&slice.line))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    };
    Ok(HttpResponse::Ok().json(feature))
}
