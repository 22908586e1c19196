use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{ArgAction, CommandFactory, Parser};

use crate::error::BuildError;

#[derive(Parser, Debug, Default)]
#[clap(
    name = "rosimg",
    about = "Builds a Docker image with an active user and ROS preinstalled",
    disable_help_flag = true
)]
pub struct CmdArgs {
    /// Show this help message and exit
    #[clap(short = 'h', long = "help", action = ArgAction::SetTrue)]
    pub help: bool,

    /// Base image. Default: ubuntu:X.Y, matched to the ROS distro
    #[clap(short = 'b', long = "base-img", value_name = "IMAGE")]
    pub base_img: Option<String>,

    /// Custom entrypoint script (replaces the default one)
    #[clap(short = 'e', long, value_name = "ENTRYPOINT_SCRIPT", conflicts_with = "use_base_img_entrypoint")]
    pub entrypoint: Option<PathBuf>,

    /// Custom environment script (replaces the default one)
    #[clap(short = 'E', long, value_name = "ENVIRONMENT_SCRIPT", conflicts_with = "no_environment")]
    pub environment: Option<PathBuf>,

    /// [REQUIRED] Image ID for the resulting image, NAME[:LABEL]
    #[clap(short = 'i', long = "img-id", value_name = "IMAGE_ID")]
    pub img_id: Option<String>,

    /// Build without reusing cached layers
    #[clap(short = 'n', long)]
    pub no_cache: bool,

    /// Target hosts with an NVIDIA driver (no Mesa packages are installed)
    #[clap(short = 'N', long)]
    pub nvidia: bool,

    /// Pull the base image from its registry instead of using the local copy
    #[clap(short = 'p', long)]
    pub pull: bool,

    /// Target platform: linux/amd64, linux/arm64 or linux/arm/v7. Default: host platform
    #[clap(short = 'P', long, value_name = "PLATFORM")]
    pub platform: Option<String>,

    /// [REQUIRED] User to run containers of the resulting image
    #[clap(short = 'u', long, value_name = "USER")]
    pub user: Option<String>,

    /// [REQUIRED] ROS distro
    #[clap(short = 'v', long = "ros-distro", value_name = "DISTRO")]
    pub ros_distro: Option<String>,

    /// Directory holding the Dockerfile, install scripts and package lists
    #[clap(long, value_name = "DIR")]
    pub resources_dir: Option<PathBuf>,

    /// Directory for the build logs
    #[clap(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Inherit the base image's entrypoint instead of installing one
    #[clap(long)]
    pub use_base_img_entrypoint: bool,

    /// Do not install an environment script
    #[clap(long)]
    pub no_environment: bool,

    /// Title for the image metadata
    #[clap(long, value_name = "TITLE")]
    pub meta_title: Option<String>,

    /// Description for the image metadata
    #[clap(long, value_name = "DESC")]
    pub meta_desc: Option<String>,

    /// Authors for the image metadata. Default: current user
    #[clap(long, value_name = "AUTHORS")]
    pub meta_authors: Option<String>,

    /// Write the build context, a build script and a docker-compose file to DIR instead of building
    #[clap(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl CmdArgs {
    /// Parses the process arguments. Help and every parse problem come back
    /// as [`BuildError::Usage`] so they share the exit path.
    pub fn parse_args() -> Result<CmdArgs, BuildError> {
        Self::parse_from_iter(std::env::args_os())
    }

    pub fn parse_from_iter<I, T>(args: I) -> Result<CmdArgs, BuildError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cmd_args = CmdArgs::try_parse_from(args).map_err(|err| BuildError::Usage(err.render().to_string()))?;
        if cmd_args.help {
            return Err(BuildError::Usage(help_text()));
        }
        cmd_args.check_values()?;
        Ok(cmd_args)
    }

    /// Required flags must be present, and no value may itself look like a flag
    /// (`--img-id=-u` slips past clap).
    fn check_values(&self) -> Result<(), BuildError> {
        let required = [
            ("-i", self.img_id.as_deref()),
            ("-u", self.user.as_deref()),
            ("-v", self.ros_distro.as_deref()),
        ];
        for (flag, value) in required {
            if value.map(str::trim).unwrap_or_default().is_empty() {
                return Err(usage_error(&format!("option {} is required", flag)));
            }
        }
        let valued = [
            ("-b", self.base_img.as_deref()),
            ("-e", self.entrypoint.as_deref().and_then(Path::to_str)),
            ("-E", self.environment.as_deref().and_then(Path::to_str)),
            ("-i", self.img_id.as_deref()),
            ("-P", self.platform.as_deref()),
            ("-u", self.user.as_deref()),
            ("-v", self.ros_distro.as_deref()),
            ("--output-dir", self.output_dir.as_deref().and_then(Path::to_str)),
        ];
        for (flag, value) in valued {
            if let Some(value) = value {
                if looks_like_flag(value) {
                    return Err(usage_error(&format!("option {} requires a value, got '{}'", flag, value)));
                }
            }
        }
        Ok(())
    }
}

pub fn looks_like_flag(value: &str) -> bool {
    value.trim_start().starts_with('-')
}

pub fn help_text() -> String {
    CmdArgs::command().render_help().to_string()
}

fn usage_error(message: &str) -> BuildError {
    let usage = CmdArgs::command().render_usage().to_string();
    BuildError::Usage(format!("error: {}\n\n{}\n\nFor more information, try '-h'.", message, usage))
}
