//! Session inspection commands.

use anyhow::{Context, Result};
use console::style;
use reviewflow::config::CliOverrides;
use reviewflow::session::{FileSessionStore, HISTORY_KEY, SessionStore};
use std::path::Path;

use super::super::{Cli, SessionsCommands};

pub async fn cmd_sessions(cli: &Cli, project_dir: &Path, command: SessionsCommands) -> Result<()> {
    let config = super::load_config(cli, project_dir, CliOverrides::default())?;
    let app = config.app_name();
    let owner = super::owner(cli, &config);
    let store = FileSessionStore::new(config.sessions_dir());

    match command {
        SessionsCommands::List => {
            let sessions = store.list(&app, &owner).await?;
            println!();
            if sessions.is_empty() {
                println!("No sessions for {}/{}.", app, owner);
                println!();
                return Ok(());
            }
            println!(
                "{:<38} {:<22} {:<8} Analyses",
                "Session", "Last update", "Events"
            );
            println!(
                "{:<38} {:<22} {:<8} --------",
                "-".repeat(36),
                "-".repeat(20),
                "------"
            );
            for session in &sessions {
                let analyses = session
                    .get_state(HISTORY_KEY)
                    .and_then(|h| h.as_array())
                    .map_or(0, |h| h.len());
                println!(
                    "{:<38} {:<22} {:<8} {}",
                    session.id,
                    session.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    session.events().len(),
                    analyses
                );
            }
            println!();
        }
        SessionsCommands::Show { id, events } => {
            let session = store
                .get(&app, &owner, &id)
                .await?
                .with_context(|| format!("Session '{}' not found for {}/{}", id, app, owner))?;

            println!();
            println!("Session {}", style(&session.id).bold());
            println!("  application = {}", session.application);
            println!("  owner       = {}", session.owner);
            println!("  created     = {}", session.created_at.to_rfc3339());
            println!("  last update = {}", session.updated_at.to_rfc3339());
            println!("  events      = {}", session.events().len());
            println!();
            println!("State:");
            println!("{}", serde_json::to_string_pretty(session.state())?);

            if events {
                println!();
                println!("Events:");
                for event in session.events() {
                    let text = event.text_content();
                    let shown = if text.is_empty() {
                        let keys: Vec<&str> = event
                            .state_delta
                            .keys()
                            .chain(event.state_append.keys())
                            .map(|k| k.as_str())
                            .collect();
                        style(format!("(state: {})", keys.join(", "))).dim().to_string()
                    } else {
                        reviewflow::util::truncate_str(&text.replace('\n', " "), 120)
                    };
                    println!(
                        "  {} {:<22} {}{}",
                        event.timestamp.format("%H:%M:%S"),
                        event.author,
                        shown,
                        if event.terminal { " ⏹" } else { "" }
                    );
                }
            }
            println!();
        }
        SessionsCommands::Delete { id } => {
            if store.delete(&app, &owner, &id).await? {
                println!("Deleted session {}", id);
            } else {
                println!("Session '{}' not found for {}/{}", id, app, owner);
            }
        }
    }

    Ok(())
}
