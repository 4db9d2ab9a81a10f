use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fenced_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

fn brace_span() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").ok()).as_ref()
}

/// Extrae el primer objeto JSON de una respuesta libre del modelo.
///
/// Primero busca un bloque ```json; si no hay, toma el tramo entre la primera
/// `{` y la última `}`. Devuelve `None` si el resultado no es un objeto.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let candidate = fenced_block()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
        .or_else(|| brace_span().and_then(|re| re.find(raw)))
        .map(|m| m.as_str())?;

    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
