//! Side channel for failures the engine swallows on purpose (bus handlers,
//! best-effort persistence, audit writes).

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSource {
    Bus,
    Storage,
    Audit,
    Shard,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub source: DiagnosticSource,
    /// Event name, storage key or shard id the failure relates to.
    pub subject: String,
    pub message: String,
}

/// Broadcasts diagnostics to any number of receivers. Reporting never blocks or fails.
#[derive(Clone)]
pub struct DiagnosticSink {
    tx: broadcast::Sender<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    pub fn report(
        &self,
        source: DiagnosticSource,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) {
        let diagnostic = Diagnostic {
            source,
            subject: subject.into(),
            message: message.into(),
        };
        tracing::warn!(
            target: "korbux::diagnostics",
            source = ?diagnostic.source,
            subject = %diagnostic.subject,
            "{}",
            diagnostic.message
        );
        // No receivers is not an error.
        let _ = self.tx.send(diagnostic);
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}
