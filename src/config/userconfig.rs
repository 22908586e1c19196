use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use home::home_dir;
use serde::{Deserialize, Serialize};

use crate::const_data::{USER_CONFIG_DIR, USER_CONFIG_FILE};

/// Optional per-user defaults read from `~/.rosimg/config.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct UserConfig {
    pub resources_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub registry_port: Option<u16>,
    pub registry_image: Option<String>,
    pub builder_name: Option<String>,
}

impl UserConfig {
    pub fn load() -> Result<UserConfig> {
        match home_dir() {
            None => Ok(UserConfig::default()),
            Some(dir) => Self::load_from(&dir.join(USER_CONFIG_DIR).join(USER_CONFIG_FILE)),
        }
    }

    pub fn load_from(config_path: &Path) -> Result<UserConfig> {
        if !config_path.is_file() {
            return Ok(UserConfig::default());
        }
        let config_file = File::open(config_path)?;
        serde_json::from_reader::<_, UserConfig>(config_file)
            .with_context(|| format!("invalid user config '{}'", config_path.display()))
    }
}
