//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `analyze`   | `Analyze`        |
//! | `sessions`  | `Sessions`       |
//! | `artifacts` | `Artifacts`      |
//! | `cache`     | `Cache`          |
//! | `config`    | `Config`         |

pub mod analyze;
pub mod artifacts;
pub mod cache;
pub mod config;
pub mod sessions;

pub use analyze::{AnalyzeArgs, cmd_analyze};
pub use artifacts::cmd_artifacts;
pub use cache::cmd_cache;
pub use config::cmd_config;
pub use sessions::cmd_sessions;

use anyhow::Result;
use reviewflow::config::{CliOverrides, ReviewflowConfig};
use std::path::Path;

use super::Cli;

/// Resolve configuration with the global flags applied.
pub(crate) fn load_config(
    cli: &Cli,
    project_dir: &Path,
    mut overrides: CliOverrides,
) -> Result<ReviewflowConfig> {
    overrides.data_dir = cli.data_dir.clone();
    overrides.app_name = cli.app.clone();
    ReviewflowConfig::load(project_dir.to_path_buf(), overrides)
}

/// The owner commands act on.
pub(crate) fn owner(cli: &Cli, config: &ReviewflowConfig) -> String {
    cli.owner
        .clone()
        .unwrap_or_else(|| config.default_owner().to_string())
}
