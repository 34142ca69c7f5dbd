//! Initialize the configuration directory: create ~/.courier, a default config and SYSTEM.md.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};
use crate::prompt::{DEFAULT_SYSTEM_PROMPT, SYSTEM_PROMPT_FILE};

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with every default spelled out if missing.
/// - Seeds `SYSTEM.md` from the bundled prompt if missing.
///
/// Existing files are left untouched.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path);
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let system_prompt = config_dir.join(SYSTEM_PROMPT_FILE);
    if !system_prompt.exists() {
        std::fs::write(&system_prompt, DEFAULT_SYSTEM_PROMPT)
            .with_context(|| format!("writing default prompt to {}", system_prompt.display()))?;
        log::info!("wrote default system prompt to {}", system_prompt.display());
    } else {
        log::debug!("{} already exists, skipping", system_prompt.display());
    }

    Ok(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_files_and_keeps_existing_ones() {
        let dir = std::env::temp_dir().join(format!("courier-init-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");

        let out = init_config_dir(&config_path).unwrap();
        assert_eq!(out, dir);
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert_eq!(config.gateway.port, 15152);
        assert!(dir.join(SYSTEM_PROMPT_FILE).exists());

        std::fs::write(dir.join(SYSTEM_PROMPT_FILE), "mine").unwrap();
        init_config_dir(&config_path).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join(SYSTEM_PROMPT_FILE)).unwrap(),
            "mine"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
