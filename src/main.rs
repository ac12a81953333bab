mod clock;
mod config;
mod constants;
mod cooldown;
mod experiment;
mod harness;
mod ledger;
mod matrix;
mod model;
mod prompt;
mod reporter;
mod transport;

use anyhow::{Context as _, Result, anyhow};
use clock::TokioClock;
use config::{HarnessConfig, MatrixFile};
use cooldown::CooldownScheduler;
use harness::{Harness, RunExperiment};
use kameo::Actor;
use prompt::PromptSizer;
use reporter::{Event, EventSink, Reporter, SummaryRow};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = config::cli().run();
    let file = args.matrix.as_deref().map(MatrixFile::load).transpose()?;
    let config = HarnessConfig::resolve(args, file)?;

    run(config).await
}

async fn run(config: HarnessConfig) -> Result<()> {
    info!(
        provider = %config.provider,
        endpoints = config.endpoints.len(),
        time_budget_secs = config.time_budget.as_secs(),
        cooldown_secs = config.cooldown.as_secs(),
        "run.started"
    );

    let sizer = if config.prompt_sizes.iter().any(|size| PromptSizer::needs_corpus(size.tokens)) {
        let corpus = tokio::fs::read_to_string(&config.corpus)
            .await
            .with_context(|| format!("failed to read corpus {}", config.corpus.display()))?;
        PromptSizer::with_corpus(&corpus)
    } else {
        PromptSizer::filler_only()
    };
    let prompts = sizer.size_all(&config.prompt_sizes)?;
    let specs = matrix::build_matrix(&config.endpoints, &prompts, &config.token_limits);

    let transport = HttpTransport::from_env(config.provider, &config.api_version)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(Reporter::new().run(event_rx));
    let events = EventSink::new(event_tx);

    let harness_ref = Harness::spawn(Harness::new(
        transport,
        TokioClock,
        CooldownScheduler::new(config.cooldown, config.cooldown_margin),
        config.time_budget,
        events.clone(),
    ));

    for spec in &specs {
        let outcome = harness_ref
            .ask(RunExperiment(spec.clone()))
            .await
            .map_err(|err| anyhow!("experiment {} on {} did not run: {err}", spec.name(), spec.endpoint()))?;
        spec.record_outcome(outcome).map_err(|_| {
            anyhow!("experiment {} on {} already has an outcome", spec.name(), spec.endpoint())
        })?;
    }

    let rows: Vec<SummaryRow> = specs.iter().map(SummaryRow::from_spec).collect();
    let failed = rows
        .iter()
        .filter(|row| row.outcome.as_ref().is_some_and(|o| !o.is_success()))
        .count();
    events.emit(Event::MatrixFinished { rows });

    harness_ref.stop_gracefully().await.ok();
    reporter.await.context("reporter task panicked")?;

    info!(experiments = specs.len(), failed, "run.finished");
    Ok(())
}
