//! Artifact inspection commands.

use anyhow::{Context, Result};
use reviewflow::artifacts::{ArtifactContent, ArtifactScope, ArtifactStore, FileArtifactStore};
use reviewflow::config::CliOverrides;
use std::path::Path;

use super::super::{ArtifactsCommands, Cli};

pub async fn cmd_artifacts(
    cli: &Cli,
    project_dir: &Path,
    command: ArtifactsCommands,
) -> Result<()> {
    let config = super::load_config(cli, project_dir, CliOverrides::default())?;
    let scope = ArtifactScope::new(config.app_name(), super::owner(cli, &config));
    let store = FileArtifactStore::new(config.artifacts_dir());

    match command {
        ArtifactsCommands::List => {
            let names = store.list_keys(&scope).await?;
            println!();
            if names.is_empty() {
                println!("No artifacts for {}/{}.", scope.application, scope.owner);
                println!();
                return Ok(());
            }
            println!("{:<60} {:<18} {:>10}", "Artifact", "Category", "Bytes");
            println!("{:<60} {:<18} {:>10}", "-".repeat(58), "-".repeat(16), "-----");
            for name in &names {
                match store.load_metadata(&scope, name).await? {
                    Some(meta) => println!(
                        "{:<60} {:<18} {:>10}",
                        name, meta.category, meta.size_bytes
                    ),
                    None => println!("{:<60} {:<18} {:>10}", name, "?", "?"),
                }
            }
            println!();
            println!("{} artifact(s)", names.len());
            println!();
        }
        ArtifactsCommands::Show { name, metadata } => {
            if metadata {
                let meta = store.load_metadata(&scope, &name).await?.with_context(|| {
                    format!("No metadata for artifact '{}'", name)
                })?;
                println!("{}", serde_json::to_string_pretty(&meta)?);
                return Ok(());
            }
            let content = store
                .load(&scope, &name, None)
                .await?
                .with_context(|| format!("Artifact '{}' not found", name))?;
            match content {
                ArtifactContent::Text(text) => println!("{}", text),
                ArtifactContent::Binary(bytes) => {
                    println!("<binary artifact, {} bytes>", bytes.len())
                }
            }
        }
    }

    Ok(())
}
