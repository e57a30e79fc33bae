//! `convoy` command-line entry point.

mod config;
mod demo;

use clap::{Parser, Subcommand};
use config::{load_corpus, ConvoyConfig};
use convoy_orchestrator::{CapabilityPlanner, Orchestrator, RiskPosture};
use convoy_retrieval::{build_queries, DocumentStore, ProvenanceStore, RetrievalPipeline};
use convoy_safety::PolicyGate;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convoy", about = "Convoy: task pipeline with retrieval and safety gating")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "convoy.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline with the built-in demo capabilities
    Run {
        /// Objective to plan and execute
        objective: String,
        /// Constraint passed to planning and retrieval (repeatable)
        #[arg(short = 'C', long = "constraint")]
        constraints: Vec<String>,
        /// Risk posture: conservative, balanced or aggressive
        #[arg(long, default_value = "balanced")]
        risk: String,
        /// Tasks dispatched at once (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
        /// JSON corpus file (overrides config)
        #[arg(long)]
        corpus: Option<PathBuf>,
    },
    /// Pass a JSON payload through the safety gate
    Scan {
        /// File holding the payload; reads the inline argument when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Inline JSON payload. Non-JSON text is scanned as a string
        payload: Option<String>,
    },
    /// Print the search queries derived for a task
    Queries {
        /// Task text
        task: String,
        /// Objective text
        #[arg(short, long, default_value = "")]
        objective: String,
        /// Constraint (repeatable)
        #[arg(short = 'C', long = "constraint")]
        constraints: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let mut config = ConvoyConfig::load(&cli.config)?;
    config.apply_env();

    match cli.command {
        Commands::Run {
            objective,
            constraints,
            risk,
            concurrency,
            corpus,
        } => {
            if let Some(n) = concurrency {
                config.orchestrator.max_concurrency = n.max(1);
            }
            if corpus.is_some() {
                config.corpus = corpus;
            }
            let risk = parse_risk(&risk)?;
            let report = run_pipeline(config, &objective, &constraints, risk).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Scan { file, payload } => {
            let payload = read_payload(file, payload)?;
            let gate = PolicyGate::new(config.policy);
            let (sanitized, decision) = gate.filter_output(&payload);
            let out = json!({ "payload": sanitized, "decision": decision });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Queries {
            task,
            objective,
            constraints,
        } => {
            let queries = build_queries(
                &task,
                &objective,
                &constraints,
                config.retrieval.max_queries,
                config.retrieval.max_query_len,
            );
            for query in queries {
                println!("{query}");
            }
        }
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_pipeline(
    config: ConvoyConfig,
    objective: &str,
    constraints: &[String],
    risk: RiskPosture,
) -> anyhow::Result<Value> {
    let documents = match config.corpus.as_deref() {
        Some(path) => load_corpus(path)?,
        None => Vec::new(),
    };
    info!(
        documents = documents.len(),
        knowledge = config.knowledge.len(),
        "Loaded retrieval sources"
    );

    let store = Arc::new(DocumentStore::from_documents(documents));
    let provenance = Arc::new(ProvenanceStore::new());
    let retrieval = RetrievalPipeline::from_config(
        config.retrieval,
        store,
        config.knowledge,
        provenance.clone(),
    )?;

    let planner = CapabilityPlanner::new(Arc::new(demo::DemoPlanner)).with_risk(risk);
    let orchestrator = Orchestrator::new(
        config.orchestrator,
        Arc::new(planner),
        demo::demo_router(),
        PolicyGate::new(config.policy),
    )
    .with_retrieval(Arc::new(retrieval))
    .with_provenance(provenance);

    let report = orchestrator.run(objective, constraints, risk).await?;
    info!(
        run_id = %report.run_id,
        tasks = report.task_count,
        incidents = report.incidents.len(),
        severity = ?report.severity,
        "Run finished"
    );
    Ok(report.to_json())
}

fn parse_risk(value: &str) -> anyhow::Result<RiskPosture> {
    serde_json::from_value(Value::String(value.trim().to_lowercase())).map_err(|_| {
        anyhow::anyhow!(
            "Unknown risk posture '{}': expected conservative, balanced or aggressive",
            value
        )
    })
}

fn read_payload(file: Option<PathBuf>, inline: Option<String>) -> anyhow::Result<Value> {
    let text = match (file, inline) {
        (Some(path), _) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read payload '{}': {}", path.display(), e))?,
        (None, Some(text)) => text,
        (None, None) => anyhow::bail!("Nothing to scan: pass a payload or --file"),
    };
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}
