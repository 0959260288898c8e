//! Configuration file discovery

use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "REMIT_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./remit.config.ron", "/etc/remit/remit.config.ron"];

/// Find the configuration file using the following precedence:
/// 1. An explicitly given path (the `--config` flag)
/// 2. `REMIT_CONFIG` environment variable
/// 3. ./remit.config.ron (current working directory)
/// 4. /etc/remit/remit.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if an explicit path does not exist, or no file is found.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    resolve(explicit, from_env.as_deref(), &DEFAULT_PATHS.map(Path::new))
}

fn resolve(
    explicit: Option<&Path>,
    from_env: Option<&Path>,
    defaults: &[&Path],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Configuration file does not exist: {}", path.display());
    }

    if let Some(path) = from_env {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.to_path_buf());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
