use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::genai::{generate_json, TextGenerator};
use crate::store::{with_timeout, DataStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BuscarRuta,
    InfoLinea,
    InfoLugar,
    InfoParaderoCercano,
    Saludo,
    Desconocida,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::BuscarRuta,
        Intent::InfoLinea,
        Intent::InfoLugar,
        Intent::InfoParaderoCercano,
        Intent::Saludo,
        Intent::Desconocida,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::BuscarRuta => "buscar_ruta",
            Intent::InfoLinea => "info_linea",
            Intent::InfoLugar => "info_lugar",
            Intent::InfoParaderoCercano => "info_paradero_cercano",
            Intent::Saludo => "saludo",
            Intent::Desconocida => "desconocida",
        }
    }

    /// Sólo acepta los nombres exactos de la lista.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.as_str() == name)
    }
}

/// Intención con sus entidades ya validadas contra los nombres conocidos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedIntent {
    pub intent: Intent,
    pub destination: Option<String>,
    pub line: Option<String>,
}

impl DetectedIntent {
    pub fn unknown() -> Self {
        Self {
            intent: Intent::Desconocida,
            destination: None,
            line: None,
        }
    }
}

/// Nombres de lugares y líneas registrados en el almacén.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownNames {
    pub places: Vec<String>,
    pub lines: Vec<String>,
}

impl KnownNames {
    pub async fn load(store: &dyn DataStore, timeout: Duration) -> Result<Self, StoreError> {
        let (pois, lines) = futures::try_join!(
            with_timeout(timeout, store.list_pois()),
            with_timeout(timeout, store.list_lines()),
        )?;

        let mut places: Vec<String> = pois
            .into_iter()
            .map(|p| p.name)
            .filter(|n| !n.trim().is_empty())
            .collect();
        let mut lines: Vec<String> = lines
            .into_iter()
            .map(|l| l.name)
            .filter(|n| !n.trim().is_empty())
            .collect();
        places.sort();
        places.dedup();
        lines.sort();
        lines.dedup();

        Ok(Self { places, lines })
    }

    fn place(&self, value: &Value) -> Option<String> {
        value
            .as_str()
            .filter(|name| self.places.iter().any(|p| p == name))
            .map(str::to_string)
    }

    fn line(&self, value: &Value) -> Option<String> {
        value
            .as_str()
            .filter(|name| self.lines.iter().any(|l| l == name))
            .map(str::to_string)
    }
}

/// Tras una recarga fallida la copia anterior se sirve este tiempo antes
/// de reintentar.
const REFRESH_RETRY: Duration = Duration::from_secs(30);

/// Caché de [`KnownNames`] con vigencia fija.
///
/// Solo una petición recarga a la vez; mientras tanto las demás usan la
/// copia anterior si existe.
pub struct NamesCache {
    ttl: Duration,
    cached: RwLock<Option<(Instant, Arc<KnownNames>)>>,
    refresh: Mutex<()>,
}

impl NamesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Copia fresca, o `Err` con la copia vencida si la hay.
    async fn current(&self) -> Result<Arc<KnownNames>, Option<Arc<KnownNames>>> {
        match self.cached.read().await.as_ref() {
            Some((expires_at, names)) if Instant::now() < *expires_at => Ok(Arc::clone(names)),
            Some((_, names)) => Err(Some(Arc::clone(names))),
            None => Err(None),
        }
    }

    /// Devuelve los nombres en caché o los recarga si vencieron. Si la
    /// recarga falla y hay una copia anterior, se usa esa.
    pub async fn get(
        &self,
        store: &dyn DataStore,
        timeout: Duration,
    ) -> Result<Arc<KnownNames>, StoreError> {
        let stale = match self.current().await {
            Ok(names) => {
                debug!("Using cached place/line names");
                return Ok(names);
            }
            Err(stale) => stale,
        };

        let _refreshing = match (&stale, self.refresh.try_lock()) {
            (_, Ok(guard)) => guard,
            (Some(stale), Err(_)) => {
                debug!("Names refresh in progress, using stale copy");
                return Ok(Arc::clone(stale));
            }
            (None, Err(_)) => self.refresh.lock().await,
        };

        // Otra petición pudo recargar mientras se esperaba el turno
        let stale = match self.current().await {
            Ok(names) => return Ok(names),
            Err(stale) => stale,
        };

        match KnownNames::load(store, timeout).await {
            Ok(names) => {
                info!(
                    "Names cache updated: {} places, {} lines",
                    names.places.len(),
                    names.lines.len()
                );
                let names = Arc::new(names);
                *self.cached.write().await = Some((Instant::now() + self.ttl, Arc::clone(&names)));
                Ok(names)
            }
            Err(e) => match stale {
                Some(stale) => {
                    warn!("Could not refresh names cache, using stale copy: {}", e);
                    let retry_at = Instant::now() + self.ttl.min(REFRESH_RETRY);
                    *self.cached.write().await = Some((retry_at, Arc::clone(&stale)));
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

/// Prompt estricto para extraer `{intencion, destino, linea}`.
pub fn build_prompt(question: &str, names: &KnownNames) -> String {
    let intents: Vec<&str> = Intent::ALL.iter().map(|i| i.as_str()).collect();
    let sanitized: String = question.chars().filter(|c| *c != '"' && *c != '\\').collect();

    format!(
        "Devuelve únicamente un JSON con las claves: \"intencion\", \"destino\", \"linea\".\n\
         - intencion: una de {intents}\n\
         - destino: nombre EXACTO de la lista LUGARES o null\n\
         - linea: nombre EXACTO de la lista LINEAS o null\n\
         \n\
         LUGARES: {places}\n\
         LINEAS: {lines}\n\
         \n\
         PREGUNTA_USUARIO: \"{question}\"\n\
         \n\
         Responde SOLO con JSON.",
        intents = serde_json::to_string(&intents).unwrap_or_default(),
        places = serde_json::to_string(&names.places).unwrap_or_default(),
        lines = serde_json::to_string(&names.lines).unwrap_or_default(),
        question = sanitized.trim(),
    )
}

/// Valida la respuesta del modelo: intención dentro de la lista y nombres
/// presentes tal cual en los conocidos. Lo que no valida se descarta.
pub fn validate(value: &Value, names: &KnownNames) -> DetectedIntent {
    let intent = value
        .get("intencion")
        .and_then(Value::as_str)
        .and_then(Intent::from_name)
        .unwrap_or(Intent::Desconocida);

    let destination = value.get("destino").and_then(|v| names.place(v));
    let line = value.get("linea").and_then(|v| names.line(v));

    if let Some(raw) = value.get("destino").and_then(Value::as_str) {
        if destination.is_none() {
            warn!("Model returned place not in known list: {}", raw);
        }
    }
    if let Some(raw) = value.get("linea").and_then(Value::as_str) {
        if line.is_none() {
            warn!("Model returned line not in known list: {}", raw);
        }
    }

    DetectedIntent {
        intent,
        destination,
        line,
    }
}

const GREETINGS: [&str; 4] = ["hola", "buenas", "buenos días", "saludos"];

/// Búsqueda local cuando no hay modelo: el nombre conocido más largo que
/// aparezca en la pregunta (sin distinguir mayúsculas). Un lugar implica
/// buscar ruta; una línea, información de la línea.
pub fn match_known_names(question: &str, names: &KnownNames) -> DetectedIntent {
    let lowered = question.to_lowercase();
    let longest = |candidates: &[String]| {
        candidates
            .iter()
            .filter(|name| lowered.contains(&name.to_lowercase()))
            .max_by_key(|name| name.chars().count())
            .cloned()
    };

    if let Some(place) = longest(&names.places) {
        return DetectedIntent {
            intent: Intent::BuscarRuta,
            destination: Some(place),
            line: None,
        };
    }
    if let Some(line) = longest(&names.lines) {
        return DetectedIntent {
            intent: Intent::InfoLinea,
            destination: None,
            line: Some(line),
        };
    }
    if GREETINGS.iter().any(|g| lowered.trim_start().starts_with(g)) {
        return DetectedIntent {
            intent: Intent::Saludo,
            destination: None,
            line: None,
        };
    }
    DetectedIntent::unknown()
}

/// Detecta la intención de la pregunta. Con modelo disponible se usa su
/// respuesta validada; si no hay modelo o su respuesta no se puede leer, se
/// recurre a [`match_known_names`].
pub async fn detect_intent(
    generator: Option<&dyn TextGenerator>,
    question: &str,
    names: &KnownNames,
) -> DetectedIntent {
    let Some(generator) = generator else {
        debug!("No text generator configured, matching names locally");
        return match_known_names(question, names);
    };

    match generate_json(generator, &build_prompt(question, names)).await {
        Some(value) => validate(&value, names),
        None => match_known_names(question, names),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genai::testing::{Failing, FixedReply};
    use crate::queries::_structs::{Line, Poi};
    use crate::store::testing::FaultyStore;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn names() -> KnownNames {
        KnownNames {
            places: vec!["Plaza de Armas".into(), "Terminal Terrestre".into()],
            lines: vec!["Línea 5".into(), "Línea 12".into()],
        }
    }

    #[test]
    fn test_intent_names_are_exact() {
        assert_eq!(Intent::from_name("buscar_ruta"), Some(Intent::BuscarRuta));
        assert_eq!(Intent::from_name("obtener_ruta"), None);
        assert_eq!(Intent::from_name("Saludo"), None);
        assert_eq!(
            serde_json::to_value(Intent::InfoParaderoCercano).unwrap(),
            json!("info_paradero_cercano")
        );
    }

    #[test]
    fn test_validate_accepts_known_names() {
        let detected = validate(
            &json!({"intencion": "buscar_ruta", "destino": "Plaza de Armas", "linea": null}),
            &names(),
        );
        assert_eq!(detected.intent, Intent::BuscarRuta);
        assert_eq!(detected.destination.as_deref(), Some("Plaza de Armas"));
        assert_eq!(detected.line, None);
    }

    #[test]
    fn test_validate_drops_unknown_values() {
        let detected = validate(
            &json!({"intencion": "reservar_taxi", "destino": "plaza de armas", "linea": 5}),
            &names(),
        );
        assert_eq!(detected, DetectedIntent::unknown());
    }

    #[test]
    fn test_prompt_lists_names_and_strips_quotes() {
        let prompt = build_prompt("¿Cómo llego a \"Plaza\\ de Armas\"?", &names());
        assert!(prompt.contains(r#"LUGARES: ["Plaza de Armas","Terminal Terrestre"]"#));
        assert!(prompt.contains(r#"LINEAS: ["Línea 5","Línea 12"]"#));
        assert!(prompt.contains("PREGUNTA_USUARIO: \"¿Cómo llego a Plaza de Armas?\""));
        assert!(prompt.contains("\"buscar_ruta\""));
    }

    #[test]
    fn test_local_matching() {
        let n = names();
        let d = match_known_names("quiero ir a la plaza de armas", &n);
        assert_eq!(d.intent, Intent::BuscarRuta);
        assert_eq!(d.destination.as_deref(), Some("Plaza de Armas"));

        let d = match_known_names("¿qué horario tiene la línea 12?", &n);
        assert_eq!(d.intent, Intent::InfoLinea);
        assert_eq!(d.line.as_deref(), Some("Línea 12"));

        assert_eq!(match_known_names("Hola!", &n).intent, Intent::Saludo);
        assert_eq!(match_known_names("qué tal el clima", &n), DetectedIntent::unknown());
    }

    #[tokio::test]
    async fn test_detect_with_model() {
        let generator = FixedReply::new(
            "```json\n{\"intencion\": \"info_linea\", \"destino\": null, \"linea\": \"Línea 5\"}\n```",
        );
        let d = detect_intent(Some(&generator), "info de la 5", &names()).await;
        assert_eq!(d.intent, Intent::InfoLinea);
        assert_eq!(d.line.as_deref(), Some("Línea 5"));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_detect_falls_back_without_model() {
        let d = detect_intent(Some(&Failing), "voy al Terminal Terrestre", &names()).await;
        assert_eq!(d.destination.as_deref(), Some("Terminal Terrestre"));

        let d = detect_intent(None, "hola", &names()).await;
        assert_eq!(d.intent, Intent::Saludo);
    }

    #[tokio::test(start_paused = true)]
    async fn test_names_cache_expires() {
        let store = MemoryStore::default();
        store
            .insert_poi(Poi {
                id: "p1".into(),
                name: "Mercado".into(),
                ..Default::default()
            })
            .await;
        let cache = NamesCache::new(Duration::from_secs(300));
        let timeout = Duration::from_secs(1);

        let first = cache.get(&store, timeout).await.unwrap();
        assert_eq!(first.places, vec!["Mercado".to_string()]);

        store
            .insert_line(Line {
                id: "l1".into(),
                name: "Línea 1".into(),
                ..Default::default()
            })
            .await;
        assert!(cache.get(&store, timeout).await.unwrap().lines.is_empty());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(
            cache.get(&store, timeout).await.unwrap().lines,
            vec!["Línea 1".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_names_cache_serves_stale_copy_while_store_stalls() {
        let inner = MemoryStore::default();
        inner
            .insert_poi(Poi {
                id: "p1".into(),
                name: "Mercado".into(),
                ..Default::default()
            })
            .await;
        let store = FaultyStore::new(inner);
        let cache = NamesCache::new(Duration::from_secs(300));
        let timeout = Duration::from_secs(5);

        cache.get(&store, timeout).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        store.stall_lines.store(true, Ordering::SeqCst);

        let started = Instant::now();
        let results =
            futures::future::join_all((0..10).map(|_| cache.get(&store, timeout))).await;
        for names in results {
            assert_eq!(names.unwrap().places, vec!["Mercado".to_string()]);
        }
        // una sola recarga espera el timeout, el resto usa la copia anterior
        assert!(started.elapsed() < Duration::from_secs(6));

        // tras el fallo no se reintenta en cada petición
        let started = Instant::now();
        assert_eq!(cache.get(&store, timeout).await.unwrap().places.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_names_cache_without_copy_reports_failure() {
        let store = FaultyStore::new(MemoryStore::default());
        store.lines_unavailable.store(true, Ordering::SeqCst);
        let cache = NamesCache::new(Duration::from_secs(300));
        assert!(matches!(
            cache.get(&store, Duration::from_secs(1)).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
