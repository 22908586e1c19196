use std::env;
use std::path::PathBuf;

use log::debug;

use crate::config::cmd::CmdArgs;
use crate::config::distro::DistroTable;
use crate::config::userconfig::UserConfig;
use crate::const_data::{
    BUILDER_NAME, DEFAULT_BRIDGE_NETWORK, DEFAULT_LOG_DIR, ENV_LOG_DIR, ENV_RESOURCES_DIR, REGISTRY_CONTAINER_NAME,
    REGISTRY_IMAGE, REGISTRY_PORT, REGISTRY_READY_ATTEMPTS, REGISTRY_READY_INTERVAL_SECS,
};
use crate::error::Result;

pub mod cmd;
pub mod distro;
pub mod userconfig;

/// Everything the orchestrator needs besides the request itself.
/// Resolved once, passed by reference.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub resources_dir: PathBuf,
    pub log_dir: PathBuf,
    pub registry: RegistrySettings,
    pub builder_name: String,
    pub distros: DistroTable,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub container_name: String,
    pub image: String,
    pub port: u16,
    pub network: String,
    pub ready_attempts: u32,
    pub ready_interval_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            container_name: REGISTRY_CONTAINER_NAME.to_string(),
            image: REGISTRY_IMAGE.to_string(),
            port: REGISTRY_PORT,
            network: DEFAULT_BRIDGE_NETWORK.to_string(),
            ready_attempts: REGISTRY_READY_ATTEMPTS,
            ready_interval_secs: REGISTRY_READY_INTERVAL_SECS,
        }
    }
}

impl AppConfig {
    /// CLI flag > environment variable > user config file > default.
    pub fn resolve(cmd_args: &CmdArgs) -> Result<AppConfig> {
        let user_config = UserConfig::load()?;
        let config = Self::merge(cmd_args, user_config, |key| env::var(key).ok());
        debug!(
            "Resolved config: resources_dir={}, log_dir={}",
            config.resources_dir.display(),
            config.log_dir.display()
        );
        Ok(config)
    }

    fn merge(cmd_args: &CmdArgs, user_config: UserConfig, env_var: impl Fn(&str) -> Option<String>) -> AppConfig {
        let resources_dir = cmd_args
            .resources_dir
            .clone()
            .or_else(|| env_var(ENV_RESOURCES_DIR).map(PathBuf::from))
            .or(user_config.resources_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let log_dir = cmd_args
            .log_dir
            .clone()
            .or_else(|| env_var(ENV_LOG_DIR).map(PathBuf::from))
            .or(user_config.log_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let defaults = RegistrySettings::default();
        AppConfig {
            resources_dir,
            log_dir,
            registry: RegistrySettings {
                image: user_config.registry_image.unwrap_or(defaults.image),
                port: user_config.registry_port.unwrap_or(defaults.port),
                ..RegistrySettings::default()
            },
            builder_name: user_config.builder_name.unwrap_or_else(|| BUILDER_NAME.to_string()),
            distros: DistroTable::default(),
        }
    }
}
