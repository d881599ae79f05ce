use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use beacon_catalog::load_catalog;
use beacon_config::{AiProviderKind, ensure_workspace_config};
use beacon_facts::{FactsError, GithubClient, SonarCloudClient, SonarClient, SourceControlClient};
use beacon_store::SqliteStore;
use beacon_summary::{AiProvider, load_ai_provider};
use beacond::pipeline::Pipeline;
use beacond::server::{AppState, build_router};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "BEACON release-notes daemon")]
struct Cli {
    #[arg(long, default_value = ".", help = "Workspace root holding .beacon configuration")]
    workspace: PathBuf,

    #[arg(long, help = "Bind address for the HTTP server (overrides config)")]
    bind: Option<String>,

    #[arg(
        long,
        conflicts_with = "refresh_once",
        help = "Collect facts once and exit"
    )]
    collect_once: bool,

    #[arg(long, help = "Run the full refresh pipeline once, print the result, and exit")]
    refresh_once: bool,

    #[arg(
        long,
        help = "Concurrent upstream requests during collection (overrides config)"
    )]
    collect_concurrency: Option<usize>,

    #[arg(
        long,
        value_parser = parse_ai_provider,
        help = "AI provider: auto, mock, or gemini (overrides config)"
    )]
    ai_provider: Option<AiProviderKind>,

    #[arg(long, help = "AI model name (overrides config)")]
    ai_model: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let workspace = cli
        .workspace
        .canonicalize()
        .context("failed to resolve workspace root")?;

    let mut config = ensure_workspace_config(&workspace).context("failed to load configuration")?;
    if let Some(provider) = cli.ai_provider {
        config.ai.provider = provider;
    }
    if let Some(model) = cli.ai_model {
        config.ai.model = Some(model);
    }
    if let Some(concurrency) = cli.collect_concurrency {
        config.server.collect_concurrency = concurrency.max(1);
    }
    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());

    let catalog = load_catalog(&workspace).context("failed to load component catalog")?;
    tracing::info!(components = catalog.len(), "catalog loaded");

    let store = SqliteStore::open(&workspace).context("failed to open store")?;

    let source_control: Option<Arc<dyn SourceControlClient>> =
        match GithubClient::from_env(&config.github.token_env, config.github.api_base.clone()) {
            Ok(client) => Some(Arc::new(client)),
            Err(FactsError::MissingToken(env_var)) => {
                tracing::warn!(env_var = %env_var, "GitHub token not set, commit fact collection disabled");
                None
            }
            Err(err) => return Err(err).context("failed to construct GitHub client"),
        };

    let sonar: Option<Arc<dyn SonarClient>> =
        match SonarCloudClient::from_env(&config.sonar.token_env, config.sonar.api_base.clone()) {
            Ok(client) => Some(Arc::new(client)),
            Err(FactsError::MissingToken(env_var)) => {
                tracing::warn!(env_var = %env_var, "Sonar token not set, sonar fact collection disabled");
                None
            }
            Err(err) => return Err(err).context("failed to construct Sonar client"),
        };

    let ai: Option<Arc<dyn AiProvider>> = match load_ai_provider(&config.ai) {
        Ok(loaded) => {
            tracing::info!(
                provider = %loaded.provider_name,
                model = %loaded.model_name,
                "AI provider ready"
            );
            Some(Arc::from(loaded.provider))
        }
        Err(err) => {
            tracing::warn!(error = %err, "AI provider unavailable, generation disabled");
            None
        }
    };

    let pipeline = Arc::new(Pipeline {
        store: Mutex::new(store),
        catalog,
        source_control,
        sonar,
        ai,
        collect_concurrency: config.server.collect_concurrency,
        checks: config.checks.clone(),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    if cli.collect_once {
        let count = runtime
            .block_on(pipeline.run_collection(Utc::now()))
            .context("fact collection failed")?;
        eprintln!("COLLECT: components={count}");
        return Ok(());
    }

    if cli.refresh_once {
        let generated = runtime
            .block_on(pipeline.run_refresh(Utc::now()))
            .context("refresh pipeline failed")?;
        let value = serde_json::to_value(&generated).context("failed to serialize summaries")?;
        return write_json_to_stdout(&value);
    }

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("failed to bind {bind}"))?;
        tracing::info!(%bind, "HTTP server listening");

        let app = build_router(AppState::new(pipeline));
        axum::serve(listener, app)
            .await
            .context("HTTP server exited with error")
    })
}

fn write_json_to_stdout(value: &serde_json::Value) -> Result<()> {
    let mut out = std::io::stdout();
    serde_json::to_writer_pretty(&mut out, value).context("failed to serialize JSON output")?;
    writeln!(&mut out).context("failed to write trailing newline")?;
    Ok(())
}

fn parse_ai_provider(value: &str) -> Result<AiProviderKind, String> {
    value.parse()
}
