//! `reviewflow analyze`: run one message through the pipeline.

use anyhow::{Context, Result, bail};
use console::style;
use reviewflow::artifacts::FileArtifactStore;
use reviewflow::cache::ResultCache;
use reviewflow::config::{CONFIG_FILE, CliOverrides, ReviewflowConfig};
use reviewflow::orchestrator::{
    AnalysisInput, FailurePolicy, LocalSynthesizer, Orchestrator, ProcessClassifier,
    ProcessSynthesizer, ProcessWorker, RunOutcome, Synthesizer, WorkerRegistry,
};
use reviewflow::session::FileSessionStore;
use reviewflow::ui::{AnalysisUI, UiMode};
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::super::Cli;

pub struct AnalyzeArgs {
    pub message: Option<String>,
    pub file: Option<PathBuf>,
    pub session: Option<String>,
    pub pacing_ms: Option<u64>,
    pub failure_policy: Option<String>,
    pub json: bool,
}

pub async fn cmd_analyze(cli: &Cli, project_dir: &Path, args: AnalyzeArgs) -> Result<()> {
    let failure_policy = args
        .failure_policy
        .as_deref()
        .map(|s| s.parse::<FailurePolicy>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let config = super::load_config(
        cli,
        project_dir,
        CliOverrides {
            pacing_ms: args.pacing_ms,
            failure_policy,
            ..CliOverrides::default()
        },
    )?;

    let message = read_message(&args)?;
    if message.trim().is_empty() {
        bail!("Nothing to analyse: pass a message, --file, or pipe the request on stdin");
    }

    let buffer = config.toml.pipeline.event_buffer;
    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let mut input = AnalysisInput::new(config.app_name(), super::owner(cli, &config), message);
    if let Some(id) = args.session {
        input = input.with_session(id);
    }

    let ui = AnalysisUI::new(if args.json { UiMode::Json } else { UiMode::Full });
    let (mut rx, handle) = orchestrator.spawn(input, buffer);
    while let Some(event) = rx.recv().await {
        ui.event(&event);
    }
    ui.finish();

    let result = match handle.await.context("Pipeline task panicked")? {
        Ok(result) => result,
        Err(e) => {
            ui.error(&e.to_string());
            return Err(e.into());
        }
    };

    if ui.mode() == UiMode::Full {
        println!("{}", style(format!("session: {}", result.session_id)).dim());
    }
    if let RunOutcome::ClassificationFailed { reason } = result.outcome {
        bail!("Classification failed: {}", reason);
    }
    Ok(())
}

fn read_message(args: &AnalyzeArgs) -> Result<String> {
    if let Some(message) = &args.message {
        return Ok(message.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut message = String::new();
    stdin
        .lock()
        .read_to_string(&mut message)
        .context("Failed to read request from stdin")?;
    Ok(message)
}

/// Wire the stores and the configured commands into an [`Orchestrator`].
pub fn build_orchestrator(config: &ReviewflowConfig) -> Result<Orchestrator> {
    let project_dir = &config.project_dir;
    let classifier = config
        .toml
        .classifier
        .to_command_spec()
        .with_context(|| {
            format!(
                "No classifier command configured. Add a [classifier] section to {} \
                 (see 'reviewflow config init').",
                config.config_dir.join(CONFIG_FILE).display()
            )
        })?
        .in_dir(project_dir);

    let synthesizer: Arc<dyn Synthesizer> = match config.toml.synthesizer.to_command_spec() {
        Some(spec) => Arc::new(ProcessSynthesizer::new(spec.in_dir(project_dir))),
        None => Arc::new(LocalSynthesizer),
    };

    let mut workers = WorkerRegistry::new();
    for kind in config.toml.enabled_workers() {
        match config.toml.worker_command(kind) {
            Some(spec) => {
                workers.register(Arc::new(ProcessWorker::new(kind, spec.in_dir(project_dir))));
            }
            None => tracing::warn!(worker = %kind, "worker enabled but has no command; skipping"),
        }
    }
    tracing::debug!(workers = ?workers.kinds(), "workers registered");

    let sessions = FileSessionStore::new(config.sessions_dir()).with_seed_file(config.seed_file());
    let artifacts = FileArtifactStore::new(config.artifacts_dir());
    let cache = ResultCache::new(config.cache_dir(), config.cache_ttl());

    let orchestrator = Orchestrator::new(
        Arc::new(sessions),
        Arc::new(artifacts),
        Arc::new(cache),
        Arc::new(ProcessClassifier::new(classifier)),
        synthesizer,
        workers,
        config.executor_settings(),
    )
    .with_keywords(&config.toml.worker_keywords());

    Ok(if config.toml.cache.enabled {
        orchestrator
    } else {
        orchestrator.without_cache()
    })
}
