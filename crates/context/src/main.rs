//! CaseForge Context Engine
//!
//! Runs one research session from the command line:
//!
//! ```text
//! context "<query>" [source-url ...] [--case label=path ...] [--synthesize]
//! ```
//!
//! Source URLs seed the retriever for web and hybrid modes; local and
//! hybrid modes read `research.local_documents_path`. Prints the session
//! report and aggregated context as JSON.

use anyhow::{bail, Context};
use caseforge_common::config::{AppConfig, ObservabilityConfig, ScorerKind};
use caseforge_common::embeddings::create_embedder;
use caseforge_common::llm::{LlmClient, OpenAIChatClient};
use caseforge_common::metrics::register_metrics;
use caseforge_common::model::ResearchRequest;
use caseforge_common::VERSION;
use caseforge_context::{
    create_scorer, create_store, HttpFetcher, LlmReportGenerator, QueryPlanner, ResearchSession,
    SessionOutcome, StaticRetriever, SynthesisGateway,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct Args {
    query: String,
    sources: Vec<String>,
    case_documents: Vec<(String, PathBuf)>,
    synthesize: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let Some(query) = args.next() else {
        bail!("usage: context \"<query>\" [source-url ...] [--case label=path ...] [--synthesize]");
    };

    let mut parsed = Args {
        query,
        sources: Vec::new(),
        case_documents: Vec::new(),
        synthesize: false,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--synthesize" => parsed.synthesize = true,
            "--case" => {
                let value = args.next().context("--case expects label=path")?;
                let (label, path) = value.split_once('=').context("--case expects label=path")?;
                parsed.case_documents.push((label.to_string(), PathBuf::from(path)));
            }
            _ => parsed.sources.push(arg),
        }
    }
    Ok(parsed)
}

fn init_observability(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    if config.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    if config.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        register_metrics();
        info!(%addr, "Metrics exporter listening");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_observability(&config.observability)?;
    info!("Starting CaseForge Context Engine v{}", VERSION);

    let args = parse_args()?;

    let mut request = ResearchRequest::new(args.query).with_config(config.research.clone());
    for (label, path) in args.case_documents {
        request = request.with_case_document(label, path);
    }

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAIChatClient::new(config.llm.clone())?);
    let embedder = match config.scoring.scorer {
        ScorerKind::Embedding => Some(create_embedder(&config.embedding)?),
        _ => None,
    };
    let scorer = create_scorer(config.scoring.scorer, embedder, Some(llm.clone()))?;

    let session = ResearchSession::builder(request)
        .planner(QueryPlanner::new(llm.clone()))
        .retriever(Arc::new(StaticRetriever::from_origins(args.sources)))
        .fetcher(Arc::new(HttpFetcher::new(config.concurrency.fetch_timeout())?))
        .scorer(scorer)
        .store(create_store(&config.storage))
        .concurrency(config.concurrency.clone())
        .build()?;

    match session.run().await {
        SessionOutcome::Ready(ready) => {
            let ready = *ready;
            if args.synthesize {
                let generator = LlmReportGenerator::new(llm)
                    .with_limits(config.llm.max_tokens, config.llm.temperature);
                let gateway = SynthesisGateway::new(Arc::new(generator));
                let context = ready.context.clone();
                let (report, synthesis) = ready.synthesize(&gateway).await?;
                let output = serde_json::json!({
                    "report": report,
                    "context": context,
                    "synthesis": synthesis,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let output = serde_json::json!({
                    "report": ready.report,
                    "context": ready.context,
                    "handoff": ready.handoff,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            Ok(())
        }
        SessionOutcome::Failed(report) => {
            error!(session_id = %report.session_id, "Research session failed");
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(1);
        }
    }
}
