//! korbux: drive the agent engine from the command line.
//!
//! Configuration comes from `.env`, the `KORBUX_CONFIG` file and `KORBUX__*` variables.
//! Logs go to stderr (`RUST_LOG`, default `info`); command output goes to stdout as JSON.

use clap::{Parser, Subcommand, ValueEnum};
use korbux_agents::CoreAgentsPlugin;
use korbux_core::{
    AgentRequest, AuditLevel, AuditType, BoxError, Engine, EngineConfig, MemoryStorage,
    SledStorage, StorageAdapter,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "korbux", version, about = "Agent execution engine")]
struct Cli {
    /// Keep everything in memory instead of the sled store at `storage_path`.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one request to an agent.
    Request {
        #[arg(long, env = "KORBUX_USER", default_value = "cli")]
        user: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        lang: Option<String>,
        #[arg(long)]
        level: Option<String>,
        input: String,
    },
    /// List registered agents.
    Agents,
    /// Write every stored response as a JSON array.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load responses from a JSON array written by `export`.
    Import { file: PathBuf },
    /// Migrate the store to a schema version.
    Migrate { version: u32 },
    /// Storage and configuration checks.
    Health,
    /// Query the audit log.
    Audit {
        #[arg(long = "type")]
        kind: Option<AuditKindArg>,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        level: Option<AuditLevelArg>,
        #[arg(long)]
        recent: Option<usize>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        summary: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AuditKindArg {
    Info,
    Warn,
    Error,
    Interaction,
}

impl From<AuditKindArg> for AuditType {
    fn from(arg: AuditKindArg) -> Self {
        match arg {
            AuditKindArg::Info => AuditType::Info,
            AuditKindArg::Warn => AuditType::Warn,
            AuditKindArg::Error => AuditType::Error,
            AuditKindArg::Interaction => AuditType::Interaction,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AuditLevelArg {
    User,
    System,
    Security,
}

impl From<AuditLevelArg> for AuditLevel {
    fn from(arg: AuditLevelArg) -> Self {
        match arg {
            AuditLevelArg::User => AuditLevel::User,
            AuditLevelArg::System => AuditLevel::System,
            AuditLevelArg::Security => AuditLevel::Security,
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_storage(memory: bool, config: &EngineConfig) -> Result<Arc<dyn StorageAdapter>, BoxError> {
    if memory {
        return Ok(Arc::new(MemoryStorage::new()));
    }
    let store = SledStorage::open_path(&config.storage_path)?;
    tracing::info!(path = %config.storage_path, entries = store.count(), "opened sled store");
    Ok(Arc::new(store))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), BoxError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[korbux] .env not loaded: {} (using system environment)", e);
    }
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = EngineConfig::load()?;
    let storage = open_storage(cli.memory, &config)?;
    let engine = Engine::new(config, storage)?;
    engine.use_plugin(&CoreAgentsPlugin)?;

    match cli.command {
        Command::Request {
            user,
            agent,
            lang,
            level,
            input,
        } => {
            let mut request = AgentRequest::new(user, agent, input);
            request.lang = lang;
            request.level = level;
            print_json(&engine.request(&request).await?)?;
        }
        Command::Agents => print_json(&engine.list_agents())?,
        Command::Export { out } => {
            let body = serde_json::to_string_pretty(&engine.export_responses()?)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, body)?;
                    tracing::info!(path = %path.display(), "responses exported");
                }
                None => println!("{}", body),
            }
        }
        Command::Import { file } => {
            let body = std::fs::read_to_string(&file)?;
            let added = engine.import_responses_json(&body)?;
            print_json(&serde_json::json!({ "added": added }))?;
        }
        Command::Migrate { version } => {
            let migrated = engine.migrate_schema(version)?;
            print_json(&serde_json::json!({ "schemaVersion": version, "migrated": migrated }))?;
        }
        Command::Health => print_json(&engine.health())?,
        Command::Audit {
            kind,
            module,
            level,
            recent,
            search,
            summary,
        } => {
            let log = engine.audit_log();
            if summary {
                return print_json(&log.summary()?);
            }
            let kind = kind.map(AuditType::from);
            let mut events = match (&search, recent, kind) {
                (Some(keyword), _, _) => log.search(keyword)?,
                (None, Some(n), _) => log.recent(n)?,
                (None, None, Some(kind)) => log.events_by_type(kind)?,
                (None, None, None) => log.export_events()?,
            };
            if let Some(kind) = kind {
                events.retain(|e| e.kind == kind);
            }
            if let Some(module) = module {
                events.retain(|e| e.module == module);
            }
            if let Some(level) = level {
                let level = AuditLevel::from(level);
                events.retain(|e| e.level == level);
            }
            print_json(&events)?;
        }
    }

    Ok(())
}
