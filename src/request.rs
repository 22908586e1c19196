use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use log::{info, warn};
use regex::Regex;

use crate::config::cmd::CmdArgs;
use crate::config::distro::{DistroTable, RosDistro};
use crate::error::{BuildError, Result};
use crate::util::file::{expand_home, non_empty_file};

/// `name:label`, always with exactly one colon and both sides non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageId {
    pub name: String,
    pub label: String,
}

impl FromStr for ImageId {
    type Err = BuildError;

    fn from_str(arg: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || BuildError::validation(format!("Invalid image id '{}'. Expected NAME[:LABEL]", arg));
        let parts = arg.split(':').collect::<Vec<&str>>();
        let image_id = match parts.as_slice() {
            [name] if !name.is_empty() => ImageId {
                name: name.to_string(),
                label: "latest".to_string(),
            },
            [name, label] if !name.is_empty() && !label.is_empty() => ImageId {
                name: name.to_string(),
                label: label.to_string(),
            },
            _ => return Err(invalid()),
        };
        if !is_valid_image_reference(&image_id.to_string()) {
            return Err(BuildError::validation(format!("Invalid Docker image name '{}'", arg)));
        }
        Ok(image_id)
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.label)
    }
}

impl ImageId {
    /// Safe to embed in a file name.
    pub fn sanitized(&self) -> String {
        self.to_string().replace([':', '/'], "_")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetPlatform {
    LinuxAmd64,
    LinuxArm64,
    LinuxArmV7,
}

impl TargetPlatform {
    pub const ALL: [TargetPlatform; 3] = [TargetPlatform::LinuxAmd64, TargetPlatform::LinuxArm64, TargetPlatform::LinuxArmV7];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPlatform::LinuxAmd64 => "linux/amd64",
            TargetPlatform::LinuxArm64 => "linux/arm64",
            TargetPlatform::LinuxArmV7 => "linux/arm/v7",
        }
    }

    pub fn from_host_arch(arch: &str) -> Option<TargetPlatform> {
        match arch {
            "x86_64" | "amd64" => Some(TargetPlatform::LinuxAmd64),
            "aarch64" | "arm64" => Some(TargetPlatform::LinuxArm64),
            "arm" | "armhf" => Some(TargetPlatform::LinuxArmV7),
            a if a.starts_with("armv7") => Some(TargetPlatform::LinuxArmV7),
            _ => None,
        }
    }

    /// Explicit value wins; otherwise the host architecture decides.
    pub fn resolve(explicit: Option<&str>, host_arch: &str) -> Result<TargetPlatform> {
        if let Some(platform) = explicit {
            return platform.trim().parse();
        }
        let platform = TargetPlatform::from_host_arch(host_arch).unwrap_or_else(|| {
            warn!(
                "Unknown host architecture '{}', defaulting to {}",
                host_arch,
                TargetPlatform::LinuxAmd64
            );
            TargetPlatform::LinuxAmd64
        });
        info!("No platform specified, using host platform {}", platform);
        Ok(platform)
    }

    pub fn supported_listing() -> String {
        let mut lines = vec!["Supported platforms:".to_string()];
        lines.extend(TargetPlatform::ALL.iter().map(|p| format!("    {}", p)));
        lines.join("\n")
    }
}

impl Display for TargetPlatform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetPlatform {
    type Err = BuildError;

    fn from_str(arg: &str) -> std::result::Result<Self, Self::Err> {
        if arg.contains(',') {
            return Err(BuildError::validation_with_detail(
                format!("Only one platform can be built at a time, got '{}'", arg),
                TargetPlatform::supported_listing(),
            ));
        }
        TargetPlatform::ALL
            .into_iter()
            .find(|p| p.as_str() == arg)
            .ok_or_else(|| {
                BuildError::validation_with_detail(
                    format!("Unsupported platform '{}'", arg),
                    TargetPlatform::supported_listing(),
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrypointSource {
    Default,
    Custom(PathBuf),
    /// Keep whatever the base image declares
    Inherit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSource {
    Default,
    Custom(PathBuf),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub title: String,
    pub description: String,
    pub authors: String,
}

/// Validated build parameters. Nothing here changes after construction.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub base_image: String,
    pub entrypoint: EntrypointSource,
    pub environment: EnvironmentSource,
    pub image_id: ImageId,
    pub use_cache: bool,
    pub pull: bool,
    pub nvidia: bool,
    pub platform: TargetPlatform,
    pub user: String,
    pub distro: RosDistro,
    pub metadata: ImageMetadata,
}

impl BuildRequest {
    pub fn from_args(cmd_args: &CmdArgs, distros: &DistroTable, host_arch: &str) -> Result<BuildRequest> {
        let image_id = cmd_args.img_id.as_deref().unwrap_or_default().trim().parse::<ImageId>()?;
        let platform = TargetPlatform::resolve(cmd_args.platform.as_deref(), host_arch)?;

        let distro_name = cmd_args.ros_distro.as_deref().unwrap_or_default().trim().to_lowercase();
        let distro = distros.get(&distro_name).cloned().ok_or_else(|| {
            BuildError::validation_with_detail(format!("Invalid ROS distro '{}'", distro_name), distros.help_listing())
        })?;

        let user = cmd_args.user.as_deref().unwrap_or_default().trim().to_string();
        if user.is_empty() || user.contains(char::is_whitespace) {
            return Err(BuildError::validation(format!("Invalid user '{}'. No whitespaces allowed", user)));
        }

        let base_image = match cmd_args.base_img.as_deref().map(str::trim) {
            Some(base_image) if !base_image.is_empty() => {
                if !is_valid_image_reference(base_image) {
                    return Err(BuildError::validation(format!("Invalid base image name '{}'", base_image)));
                }
                base_image.to_string()
            }
            _ => {
                let base_image = distro.default_base_image();
                info!(
                    "No base image specified, defaulting to '{}' for 'ROS{}-{}'",
                    base_image, distro.ros_version, distro.name
                );
                base_image
            }
        };

        let entrypoint = if cmd_args.use_base_img_entrypoint {
            EntrypointSource::Inherit
        } else {
            match &cmd_args.entrypoint {
                Some(path) => EntrypointSource::Custom(custom_script(path, "entrypoint")?),
                None => EntrypointSource::Default,
            }
        };
        let environment = if cmd_args.no_environment {
            EnvironmentSource::Disabled
        } else {
            match &cmd_args.environment {
                Some(path) => EnvironmentSource::Custom(custom_script(path, "environment")?),
                None => EnvironmentSource::Default,
            }
        };

        let metadata = ImageMetadata {
            title: text_or(
                cmd_args.meta_title.as_deref(),
                format!("Docker image with ROS{}-{}", distro.ros_version, distro.name),
            ),
            description: text_or(cmd_args.meta_desc.as_deref(), "Docker image for development and testing".to_string()),
            authors: text_or(cmd_args.meta_authors.as_deref(), current_user()),
        };

        Ok(BuildRequest {
            base_image,
            entrypoint,
            environment,
            image_id,
            use_cache: !cmd_args.no_cache,
            pull: cmd_args.pull,
            nvidia: cmd_args.nvidia,
            platform,
            user,
            distro,
            metadata,
        })
    }

    pub fn user_home(&self) -> String {
        if self.user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", self.user)
        }
    }
}

fn custom_script(path: &std::path::Path, kind: &str) -> Result<PathBuf> {
    let path = expand_home(path);
    if !non_empty_file(&path) {
        return Err(BuildError::Precondition(format!(
            "Custom {} file '{}' not found or empty",
            kind,
            path.display()
        )));
    }
    Ok(std::fs::canonicalize(&path)?)
}

fn text_or(value: Option<&str>, default: String) -> String {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string).unwrap_or(default)
}

fn current_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

/// `[HOST[:PORT]/]PATH[:TAG]` as docker accepts it.
pub fn is_valid_image_reference(name: &str) -> bool {
    static IMAGE_REFERENCE: OnceLock<Regex> = OnceLock::new();
    IMAGE_REFERENCE
        .get_or_init(|| {
            let component = r"[a-z0-9]+(?:(?:\.|_{1,2}|-+)[a-z0-9]+)*";
            let pattern = format!(r"^(?:[a-z0-9.-]+(?::[0-9]+)?/)?{c}(?:/{c})*(?::[a-zA-Z0-9_.-]+)?$", c = component);
            Regex::new(&pattern).expect("static image reference pattern")
        })
        .is_match(name)
}
