use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use colored::Colorize;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::context::{self, DOCKERFILE};
use crate::error::{BuildError, Result};
use crate::request::BuildRequest;
use crate::subcmd::build::{build_args, labels, CREATED_LABEL};
use crate::util::file::set_mode;

pub const BUILD_SCRIPT: &str = "build.sh";
pub const COMPOSE_FILE: &str = "docker-compose.yaml";
const WORKSPACE_DIR: &str = "workspace";
const DATASETS_DIR: &str = "datasets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub output_dir: PathBuf,
    pub build_script: PathBuf,
    pub compose_file: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComposeFile {
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub network_mode: String,
    pub stdin_open: bool,
    pub tty: bool,
    pub environment: Vec<String>,
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

/// Writes everything needed to build and run the image later, without touching docker.
pub struct ExportCommand {}

impl ExportCommand {
    pub fn run(request: &BuildRequest, config: &AppConfig, output_dir: &Path) -> Result<ExportReport> {
        check_output_dir(output_dir)?;
        let oldest_os_version = config
            .distros
            .oldest_os_version()
            .unwrap_or(&request.distro.os_version)
            .to_string();
        context::export(request, &config.resources_dir, &oldest_os_version, output_dir)?;
        for dir in [WORKSPACE_DIR, DATASETS_DIR] {
            fs::create_dir_all(output_dir.join(dir))?;
        }

        let build_script = output_dir.join(BUILD_SCRIPT);
        fs::write(&build_script, build_script_text(request))?;
        set_mode(&build_script, true)?;

        let metadata = fs::metadata(output_dir)?;
        let compose = compose_file(request, metadata.uid(), metadata.gid());
        let compose_text = serde_yaml::to_string(&compose).map_err(anyhow::Error::from)?;
        let compose_file = output_dir.join(COMPOSE_FILE);
        fs::write(&compose_file, compose_text)?;
        set_mode(&compose_file, false)?;

        let report = ExportReport {
            output_dir: output_dir.to_path_buf(),
            build_script,
            compose_file,
        };
        print_export_success(request, &report);
        Ok(report)
    }
}

/// A missing or empty directory is fine, anything else could overwrite user files.
fn check_output_dir(output_dir: &Path) -> Result<()> {
    if !output_dir.exists() {
        return Ok(());
    }
    if !output_dir.is_dir() || fs::read_dir(output_dir)?.next().is_some() {
        return Err(BuildError::Precondition(format!(
            "Output directory '{}' already exists and is not empty",
            output_dir.display()
        )));
    }
    Ok(())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn build_script_text(request: &BuildRequest) -> String {
    let mut options = vec![
        format!("--file {}", DOCKERFILE),
        "--progress=plain".to_string(),
        format!("--platform {}", request.platform),
    ];
    if request.pull {
        options.push("--pull".to_string());
    }
    if !request.use_cache {
        options.push("--no-cache".to_string());
    }
    for (key, value) in build_args(request, &request.base_image) {
        options.push(format!("--build-arg {}", shell_quote(&format!("{}={}", key, value))));
    }
    for (key, value) in labels(request, Utc::now()) {
        if key == CREATED_LABEL {
            options.push(format!("--label \"{}=$(date -u +%Y-%m-%dT%H:%M:%SZ)\"", key));
        } else {
            options.push(format!("--label {}", shell_quote(&format!("{}={}", key, value))));
        }
    }
    options.push(format!("--tag {}", shell_quote(&request.image_id.to_string())));
    options.push("\"$@\" .".to_string());

    format!(
        "#!/usr/bin/env bash\n\
         # Builds {} from the files next to this script. Extra arguments go to docker build.\n\
         set -euo pipefail\n\
         cd \"$(dirname \"$(readlink -f \"$0\")\")\"\n\
         \n\
         DOCKER_BUILDKIT=1 docker build \\\n    {}\n",
        request.image_id,
        options.join(" \\\n    ")
    )
}

pub fn service_name(request: &BuildRequest) -> String {
    format!("{}_cont", request.image_id.sanitized())
}

pub fn compose_file(request: &BuildRequest, uid: u32, gid: u32) -> ComposeFile {
    let home = request.user_home();
    let mut environment = vec![format!("EXT_UID={}", uid), format!("EXT_GID={}", gid)];
    let mut runtime = None;
    if request.nvidia {
        environment.push("NVIDIA_VISIBLE_DEVICES=all".to_string());
        environment.push("NVIDIA_DRIVER_CAPABILITIES=all".to_string());
        runtime = Some("nvidia".to_string());
    }
    let service = ComposeService {
        image: request.image_id.to_string(),
        container_name: service_name(request),
        network_mode: "host".to_string(),
        stdin_open: true,
        tty: true,
        environment,
        volumes: vec![
            format!("./{}:{}/workspace", WORKSPACE_DIR, home),
            format!("./{}:{}/datasets", DATASETS_DIR, home),
            format!("${{HOME}}/.ssh:{}/.ssh:ro", home),
            format!("${{HOME}}/.gitconfig:{}/.gitconfig:ro", home),
        ],
        runtime,
    };
    ComposeFile {
        services: BTreeMap::from([(service_name(request), service)]),
    }
}

fn print_export_success(request: &BuildRequest, report: &ExportReport) {
    info!("Export of '{}' finished", request.image_id);
    println!(
        "{}",
        format!(
            r#"
Docker files for the image '{}' written to:
{}

Build with:  {}
Run with:    docker compose -f {} up -d
"#,
            request.image_id,
            report.output_dir.display(),
            report.build_script.display(),
            report.compose_file.display()
        )
        .green()
    );
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::config::distro::DistroTable;
    use crate::config::RegistrySettings;
    use crate::context::tests::{request, resources_dir};

    fn config(resources: &Path) -> AppConfig {
        AppConfig {
            resources_dir: resources.to_path_buf(),
            log_dir: PathBuf::from("/tmp"),
            registry: RegistrySettings::default(),
            builder_name: "rosimg_builder".to_string(),
            distros: DistroTable::default(),
        }
    }

    #[test]
    fn export_writes_context_script_and_compose() -> anyhow::Result<()> {
        let resources = resources_dir();
        let out = tempfile::tempdir()?;
        let dest = out.path().join("export");
        let report = ExportCommand::run(&request("humble", false), &config(resources.path()), &dest)?;

        assert!(dest.join(DOCKERFILE).is_file());
        assert!(dest.join(WORKSPACE_DIR).is_dir());
        assert!(dest.join(DATASETS_DIR).is_dir());
        assert_eq!(report.build_script.metadata()?.permissions().mode() & 0o777, 0o775);

        let compose = serde_yaml::from_str::<ComposeFile>(&fs::read_to_string(&report.compose_file)?)?;
        let service = &compose.services["myimg_latest_cont"];
        assert_eq!(service.image, "myimg:latest");
        assert!(service.volumes.contains(&"./workspace:/home/alice/workspace".to_string()));
        assert!(service.environment.iter().any(|e| e.starts_with("EXT_UID=")));
        assert_eq!(service.runtime, None);
        Ok(())
    }

    #[test]
    fn non_empty_output_dir_is_refused() -> anyhow::Result<()> {
        let resources = resources_dir();
        let out = tempfile::tempdir()?;
        fs::write(out.path().join("keep.txt"), "mine")?;
        let result = ExportCommand::run(&request("humble", false), &config(resources.path()), out.path());
        assert!(matches!(result, Err(BuildError::Precondition(_))));
        assert_eq!(fs::read_to_string(out.path().join("keep.txt"))?, "mine");
        assert!(!out.path().join(DOCKERFILE).exists());
        Ok(())
    }

    #[test]
    fn nvidia_compose_uses_the_nvidia_runtime() {
        let compose = compose_file(&request("noetic", true), 1000, 1001);
        let service = &compose.services["myimg_latest_cont"];
        assert_eq!(service.runtime.as_deref(), Some("nvidia"));
        assert!(service.environment.contains(&"EXT_GID=1001".to_string()));
        assert!(service.environment.contains(&"NVIDIA_VISIBLE_DEVICES=all".to_string()));
    }

    #[test]
    fn build_script_quotes_values_and_builds_here() {
        let mut req = request("noetic", false);
        req.metadata.title = "Alice's image".to_string();
        req.use_cache = false;
        let script = build_script_text(&req);
        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("--build-arg 'BASE_IMG=ubuntu:20.04'"));
        assert!(script.contains("--label 'org.opencontainers.image.title=Alice'\\''s image'"));
        assert!(script.contains("--no-cache"));
        assert!(script.contains("--platform linux/amd64"));
        assert!(script.contains("--tag 'myimg:latest'"));
        assert!(script.trim_end().ends_with("\"$@\" ."));
    }
}
