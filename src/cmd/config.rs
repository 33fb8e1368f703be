//! Configuration view and validation commands: `reviewflow config`.

use anyhow::Result;
use reviewflow::config::{CONFIG_FILE, CliOverrides, ReviewflowToml};
use reviewflow::review::WorkerKind;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(
    cli: &Cli,
    project_dir: &std::path::Path,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config = super::load_config(cli, project_dir, CliOverrides::default())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Reviewflow Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = &config.toml;
            println!("[pipeline]");
            println!("  pacing_ms = {}", toml.pipeline.pacing_ms);
            println!("  worker_timeout_secs = {}", toml.pipeline.worker_timeout_secs);
            println!("  failure_policy = \"{}\"", toml.pipeline.failure_policy);
            println!("  event_buffer = {}", toml.pipeline.event_buffer);
            println!();
            println!("[cache]");
            println!("  enabled = {}", toml.cache.enabled);
            println!("  ttl_secs = {}", toml.cache.ttl_secs);
            println!();
            println!("[classifier]");
            match &toml.classifier.command {
                Some(cmd) => println!("  command = \"{}\"", cmd),
                None => println!("  (not configured)"),
            }
            println!();
            println!("[synthesizer]");
            match &toml.synthesizer.command {
                Some(cmd) => println!("  command = \"{}\"", cmd),
                None => println!("  (local report)"),
            }
            println!();

            println!("Workers:");
            let enabled = toml.enabled_workers();
            let keywords = toml.worker_keywords();
            for kind in WorkerKind::all() {
                let status = if !enabled.contains(&kind) {
                    "disabled".to_string()
                } else {
                    match toml.worker_command(kind) {
                        Some(spec) => format!("command = \"{}\"", spec.program),
                        None => "no command".to_string(),
                    }
                };
                let words = keywords
                    .get(&kind)
                    .map(|k| k.join(", "))
                    .unwrap_or_else(|| kind.default_keywords().join(", "));
                println!("  {:<10} {:<32} keywords: {}", kind.domain(), status, words);
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  data_dir = \"{}\"", config.data_dir().display());
            println!("  app_name = \"{}\"", config.app_name());
            println!("  owner = \"{}\"", super::owner(cli, &config));
            println!("  pacing_ms = {}", config.pacing().as_millis());
            println!("  cache_ttl_secs = {}", config.cache_ttl().as_secs());
            println!("  failure_policy = \"{}\"", config.failure_policy());
            println!();

            if !config_path.exists() {
                println!("Run 'reviewflow config init' to create a {} file.", CONFIG_FILE);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            ReviewflowToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [classifier] command (required for 'reviewflow analyze')");
            println!("  - [workers.<domain>] command, keywords, enabled");
            println!("  - [synthesizer] command (optional)");
            println!("  - [pipeline] pacing_ms, worker_timeout_secs, failure_policy");
            println!();
        }
    }

    Ok(())
}
