//! Echo agent: replies with the (already truncated) input.

use korbux_core::{Agent, AgentContext, AgentRequest, AgentResponse, BoxError};
use std::collections::BTreeSet;

const AGENT_ID: &str = "echo";

#[derive(Debug, Default)]
pub struct EchoAgent;

impl EchoAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn name(&self) -> &str {
        "Echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn capabilities(&self) -> BTreeSet<String> {
        BTreeSet::from(["echo".to_string(), "diagnostics".to_string()])
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResponse, BoxError> {
        Ok(ctx.response_for(request, format!("echo: {}", request.input)))
    }
}
