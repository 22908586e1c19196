pub const DEFAULT_LOG_DIR: &str = "/tmp";
pub const CONTEXT_DIR_PREFIX: &str = "context_";

/// Fixed settings of the temporary registry
pub const REGISTRY_CONTAINER_NAME: &str = "rosimg_tmp_registry";
pub const REGISTRY_IMAGE: &str = "registry:2";
pub const REGISTRY_PORT: u16 = 5000;
pub const REGISTRY_READY_ATTEMPTS: u32 = 10;
pub const REGISTRY_READY_INTERVAL_SECS: u64 = 1;

pub const BUILDER_NAME: &str = "rosimg_builder";

pub const DEFAULT_BRIDGE_NETWORK: &str = "bridge";

/// Replaced with the ROS distro name inside the environment script
pub const ROS_DISTRO_PLACEHOLDER: &str = "__ROS_DISTRO__";

pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const SPECIFIC_LOG_PATTERN: &str = r"\[\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}\]";

pub const USER_CONFIG_DIR: &str = ".rosimg";
pub const USER_CONFIG_FILE: &str = "config.json";

pub const ENV_RESOURCES_DIR: &str = "ROSIMG_RESOURCES_DIR";
pub const ENV_LOG_DIR: &str = "ROSIMG_LOG_DIR";
