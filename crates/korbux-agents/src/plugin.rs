use crate::{EchoAgent, KeywordAgent};
use korbux_core::{BoxError, Engine, Plugin};
use std::sync::Arc;

/// Registers [`EchoAgent`] and [`KeywordAgent`].
#[derive(Debug, Default)]
pub struct CoreAgentsPlugin;

impl Plugin for CoreAgentsPlugin {
    fn id(&self) -> &str {
        "core-agents"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn install(&self, engine: &Engine) -> Result<(), BoxError> {
        engine.register_agent(Arc::new(EchoAgent::new()));
        engine.register_agent(Arc::new(KeywordAgent::new()));
        Ok(())
    }
}
