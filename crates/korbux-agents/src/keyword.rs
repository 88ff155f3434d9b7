//! Rule-based agent: matches Spanish and English keywords and answers in the
//! request's language (Spanish unless it starts with `en`).

use chrono::Utc;
use korbux_core::{Agent, AgentContext, AgentRequest, AgentResponse, BoxError};
use std::collections::BTreeSet;

const AGENT_ID: &str = "keyword";

/// What a message was recognized as. Checked in declaration order; first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Greeting,
    Thanks,
    Time,
    Calculation,
    /// Asks to see the request metadata; only matches when metadata is present.
    Context,
    Other,
}

const GREETING: &[&str] = &["hola", "saludos", "hello", "hi ", "greetings"];
const THANKS: &[&str] = &["gracias", "thanks", "thank you"];
const TIME: &[&str] = &["hora", "time"];
const CALCULATION: &[&str] = &["calcular", "calculate", "compute"];
const CONTEXT: &[&str] = &["contexto", "context"];

impl Topic {
    pub fn classify(message: &str, has_metadata: bool) -> Self {
        // Pad so word-ish keywords like "hi " also match at the end of the message.
        let lower = format!("{} ", message.to_lowercase());
        let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        if any(GREETING) {
            Topic::Greeting
        } else if any(THANKS) {
            Topic::Thanks
        } else if any(TIME) {
            Topic::Time
        } else if any(CALCULATION) {
            Topic::Calculation
        } else if has_metadata && any(CONTEXT) {
            Topic::Context
        } else {
            Topic::Other
        }
    }
}

#[derive(Debug, Default)]
pub struct KeywordAgent;

impl KeywordAgent {
    pub fn new() -> Self {
        Self
    }

    fn reply(topic: Topic, message: &str, request: &AgentRequest, english: bool) -> String {
        match (topic, english) {
            (Topic::Greeting, false) => "¡Hola! ¿En qué puedo ayudarte hoy?".to_string(),
            (Topic::Greeting, true) => "Hello! How can I help you today?".to_string(),
            (Topic::Thanks, false) => "De nada. Estoy aquí para servirte.".to_string(),
            (Topic::Thanks, true) => "You're welcome. I'm here to help.".to_string(),
            (Topic::Time, false) => format!("La hora actual es: {} UTC.", Utc::now().format("%H:%M:%S")),
            (Topic::Time, true) => format!("The current time is {} UTC.", Utc::now().format("%H:%M:%S")),
            (Topic::Calculation, false) => {
                "Entendido, estoy procesando tu solicitud de cálculo. [action: calculation]".to_string()
            }
            (Topic::Calculation, true) => {
                "Understood, processing your calculation request. [action: calculation]".to_string()
            }
            (Topic::Context, _) => {
                let metadata = request
                    .metadata
                    .as_ref()
                    .and_then(|m| serde_json::to_string_pretty(m).ok())
                    .unwrap_or_default();
                if english {
                    format!("Here is the context I have:\n{}", metadata)
                } else {
                    format!("Aquí está el contexto que tengo:\n{}", metadata)
                }
            }
            (Topic::Other, false) => {
                format!("Recibí tu mensaje: '{}'. Estoy pensando en cómo responder...", message)
            }
            (Topic::Other, true) => {
                format!("I received your message: '{}'. Thinking about how to answer...", message)
            }
        }
    }
}

#[async_trait::async_trait]
impl Agent for KeywordAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn name(&self) -> &str {
        "Keyword Reasoner"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn capabilities(&self) -> BTreeSet<String> {
        ["greeting", "thanks", "time", "calculation", "context"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResponse, BoxError> {
        let message = ctx.sanitize(&request.input);
        if message.is_empty() {
            return Err("keyword agent needs a non-empty message".into());
        }

        let lang = request
            .lang
            .as_deref()
            .unwrap_or(ctx.config().default_lang.as_str());
        let english = lang.starts_with("en");
        let topic = Topic::classify(&message, request.metadata.is_some());
        tracing::debug!(
            target: "korbux::dispatch",
            agent_id = AGENT_ID,
            user_id = %request.user_id,
            topic = ?topic,
            "keyword match"
        );

        Ok(ctx.response_for(request, Self::reply(topic, &message, request, english)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use korbux_core::{Engine, EngineConfig, EngineError, MemoryStorage};
    use std::sync::Arc;

    fn engine() -> Engine {
        let engine = Engine::new(EngineConfig::default(), Arc::new(MemoryStorage::new())).unwrap();
        engine.register_agent(Arc::new(KeywordAgent::new()));
        engine
    }

    #[test]
    fn test_classify() {
        assert_eq!(Topic::classify("Hola amigo", false), Topic::Greeting);
        assert_eq!(Topic::classify("say hi", false), Topic::Greeting);
        assert_eq!(Topic::classify("this is fine", false), Topic::Other);
        assert_eq!(Topic::classify("muchas gracias", false), Topic::Thanks);
        assert_eq!(Topic::classify("¿Qué hora es?", false), Topic::Time);
        assert_eq!(Topic::classify("calcular 2+2", false), Topic::Calculation);
        assert_eq!(Topic::classify("show context", false), Topic::Other);
        assert_eq!(Topic::classify("show context", true), Topic::Context);
    }

    #[tokio::test]
    async fn test_replies_follow_language() {
        let engine = engine();
        let es = engine
            .request(&AgentRequest::new("u1", "keyword", "gracias"))
            .await
            .unwrap();
        assert!(es.output.starts_with("De nada"));

        let en = engine
            .request(&AgentRequest::new("u1", "keyword", "thanks!").with_lang("en"))
            .await
            .unwrap();
        assert!(en.output.starts_with("You're welcome"));
    }

    #[tokio::test]
    async fn test_calculation_is_tagged() {
        let engine = engine();
        let resp = engine
            .request(&AgentRequest::new("u1", "keyword", "please calculate 6*7").with_lang("en"))
            .await
            .unwrap();
        assert!(resp.output.contains("[action: calculation]"));
    }

    #[tokio::test]
    async fn test_context_and_fallback() {
        let engine = engine();
        let resp = engine
            .request(
                &AgentRequest::new("u1", "keyword", "contexto por favor")
                    .with_metadata(serde_json::json!({"plan": "pro"})),
            )
            .await
            .unwrap();
        assert!(resp.output.contains("\"plan\": \"pro\""));

        let resp = engine
            .request(&AgentRequest::new("u1", "keyword", "<b>quiero pizza</b>"))
            .await
            .unwrap();
        assert!(resp.output.contains("'bquiero pizza/b'"));
    }

    #[tokio::test]
    async fn test_blank_input_is_an_agent_error() {
        let engine = engine();
        let err = engine
            .request(&AgentRequest::new("u1", "keyword", "  \u{7} "))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Agent(_)));
    }
}
