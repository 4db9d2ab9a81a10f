use geo::Coord;
use tracing::{info, warn};

use super::intent::{detect_intent, DetectedIntent, Intent};
use super::{ChatError, Chatbot};

pub const GREETING: &str = "¡Hola! ¿En qué puedo ayudarte hoy?";
pub const CLARIFICATION: &str = "Lo siento, no pude identificar un lugar o línea específico con la información que diste. ¿Puedes decir el nombre exacto del lugar o la línea?";

impl Chatbot {
    /// Responde una pregunta del usuario ubicado en `user`.
    pub async fn answer(&self, question: &str, user: Coord<f64>) -> Result<String, ChatError> {
        let names = self.names.get(self.store.as_ref(), self.timeout()).await?;
        let detected = detect_intent(self.generator(), question, &names).await;
        info!(
            "Intent {} (destino: {:?}, linea: {:?})",
            detected.intent.as_str(),
            detected.destination,
            detected.line
        );
        self.dispatch(detected, user).await
    }

    /// Envía la intención a su manejador. Una intención sin la entidad que
    /// necesita cae en la aclaración.
    pub async fn dispatch(
        &self,
        detected: DetectedIntent,
        user: Coord<f64>,
    ) -> Result<String, ChatError> {
        match (detected.intent, detected.destination, detected.line) {
            (Intent::BuscarRuta, Some(destination), _) => {
                self.route_to_destination(&destination, user).await
            }
            (Intent::InfoLinea, _, Some(line)) => self.line_info(&line).await,
            (Intent::InfoLugar, Some(place), _) => self.place_info(&place).await,
            (Intent::InfoParaderoCercano, _, _) => self.nearest_stop(user).await,
            (Intent::Saludo, _, _) => Ok(GREETING.to_string()),
            (intent, _, _) => {
                warn!("Intent {} without enough entities", intent.as_str());
                Ok(CLARIFICATION.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::genai::testing::{FixedReply, Scripted};
    use crate::genai::TextGenerator;
    use crate::queries::_structs::{GeoPoint, Line, Poi};
    use crate::store::testing::FaultyStore;
    use crate::store::{DataStore, MemoryStore};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    async fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::default();
        store
            .insert_poi(Poi {
                id: "p1".into(),
                name: "Plaza de Armas".into(),
                coordinate: Some(GeoPoint::new(0.0, 0.0)),
                ..Default::default()
            })
            .await;
        store
            .insert_line(Line {
                id: "l5".into(),
                name: "Línea 5".into(),
                description: Some("Centro a terminal".into()),
                outbound_points: vec![GeoPoint::new(-0.01, 0.0), GeoPoint::new(0.01, 0.0)],
                ..Default::default()
            })
            .await;
        Arc::new(store)
    }

    fn chatbot(store: Arc<dyn DataStore>, generator: Option<Arc<dyn TextGenerator>>) -> Chatbot {
        Chatbot::new(store, generator, &AppConfig::default())
    }

    fn user() -> Coord<f64> {
        Coord { x: 0.0, y: 0.0 }
    }

    #[tokio::test]
    async fn test_greeting_and_clarification() {
        let bot = chatbot(store().await, None);
        assert_eq!(bot.answer("hola", user()).await.unwrap(), GREETING);
        assert_eq!(
            bot.answer("¿va a llover?", user()).await.unwrap(),
            CLARIFICATION
        );
    }

    #[tokio::test]
    async fn test_intent_without_entity_asks_again() {
        let bot = chatbot(store().await, None);
        let detected = DetectedIntent {
            intent: Intent::BuscarRuta,
            destination: None,
            line: Some("Línea 5".into()),
        };
        assert_eq!(bot.dispatch(detected, user()).await.unwrap(), CLARIFICATION);
    }

    #[tokio::test]
    async fn test_model_intent_routes_to_line_info() {
        let generator = Scripted(vec![
            ("PREGUNTA_USUARIO", r#"{"intencion":"info_linea","destino":null,"linea":"Línea 5"}"#),
            ("\"nombre\": \"Línea 5\"", "La Línea 5 va del centro a la terminal."),
        ]);
        let bot = chatbot(store().await, Some(Arc::new(generator)));
        assert_eq!(
            bot.answer("háblame de la cinco", user()).await.unwrap(),
            "La Línea 5 va del centro a la terminal."
        );
    }

    #[tokio::test]
    async fn test_model_returning_old_intent_name_is_unknown() {
        let generator = FixedReply::new(r#"{"intencion":"obtener_ruta","destino":"Plaza de Armas"}"#);
        let bot = chatbot(store().await, Some(Arc::new(generator)));
        assert_eq!(
            bot.answer("cómo llego a la plaza", user()).await.unwrap(),
            CLARIFICATION
        );
    }

    #[tokio::test]
    async fn test_store_unavailable_is_an_error() {
        let faulty = FaultyStore::new(MemoryStore::default());
        faulty.lines_unavailable.store(true, Ordering::SeqCst);
        let bot = chatbot(Arc::new(faulty), None);
        assert!(matches!(
            bot.answer("hola", user()).await,
            Err(ChatError::Store(_))
        ));
    }
}
