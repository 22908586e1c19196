use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use colored::Colorize;
use log::{info, warn};

use crate::buildlog::BuildLogs;
use crate::config::AppConfig;
use crate::context::BuildContext;
use crate::error::{BuildError, Result};
use crate::exec::{CommandRunner, ExternalCommand, OutputMode};
use crate::registry::{self, ReadinessProbe, RegistryLease};
use crate::request::{BuildRequest, EntrypointSource, EnvironmentSource};

const BUILDKITD_CONFIG: &str = "buildkitd.toml";
pub const CREATED_LABEL: &str = "org.opencontainers.image.created";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ParsingArgs,
    Validating,
    AssemblingContext,
    BootstrappingRegistry,
    Building,
    PostProcessingLogs,
    CleaningUp,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::ParsingArgs => "parsing arguments",
            Stage::Validating => "validating",
            Stage::AssemblingContext => "assembling build context",
            Stage::BootstrappingRegistry => "bootstrapping registry",
            Stage::Building => "building",
            Stage::PostProcessingLogs => "post-processing logs",
            Stage::CleaningUp => "cleaning up",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Exit status of the build tool
    pub exit_code: i32,
    pub stages: Vec<Stage>,
    pub complete_log: Option<PathBuf>,
    pub specific_log: Option<PathBuf>,
}

pub struct BuildCommand<'a> {
    config: &'a AppConfig,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn ReadinessProbe,
    stages: Vec<Stage>,
}

impl<'a> BuildCommand<'a> {
    /// Runs everything after validation. Registry and context teardown happen
    /// whatever the build outcome; their failures are only logged.
    pub fn run(
        request: &BuildRequest,
        config: &'a AppConfig,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn ReadinessProbe,
    ) -> Result<BuildReport> {
        let mut command = BuildCommand::new(config, runner, probe);
        let result = command.execute(request);
        if let Err(err) = &result {
            if command.reached(Stage::Building) {
                print_build_failed(request, err);
            }
        }
        result
    }

    fn new(config: &'a AppConfig, runner: &'a dyn CommandRunner, probe: &'a dyn ReadinessProbe) -> BuildCommand<'a> {
        BuildCommand {
            config,
            runner,
            probe,
            stages: vec![Stage::ParsingArgs, Stage::Validating],
        }
    }

    fn reached(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    fn enter(&mut self, stage: Stage) {
        info!("Stage: {}", stage);
        self.stages.push(stage);
    }

    fn execute(&mut self, request: &BuildRequest) -> Result<BuildReport> {
        self.enter(Stage::AssemblingContext);
        let oldest_os_version = self
            .config
            .distros
            .oldest_os_version()
            .unwrap_or(&request.distro.os_version)
            .to_string();
        let context = BuildContext::assemble(request, &self.config.resources_dir, &oldest_os_version)?;
        self.execute_in(request, context)
    }

    /// Owns the context from here on, so it is removed on every path out.
    fn execute_in(&mut self, request: &BuildRequest, context: BuildContext) -> Result<BuildReport> {
        let mut lease = None;
        let outcome = self.build_in_context(request, &context, &mut lease);

        self.enter(Stage::CleaningUp);
        let registry_clean = registry::release(lease, self.runner);
        let context_clean = context.cleanup();
        if !(registry_clean && context_clean) {
            warn!("Cleanup did not finish, some temporary resources may be left behind");
        }

        let mut report = outcome?;
        self.enter(Stage::Done);
        report.stages = self.stages.clone();
        Ok(report)
    }

    fn build_in_context(
        &mut self,
        request: &BuildRequest,
        context: &BuildContext,
        lease: &mut Option<RegistryLease>,
    ) -> Result<BuildReport> {
        if !request.pull {
            self.enter(Stage::BootstrappingRegistry);
            *lease = Some(registry::bootstrap(
                self.runner,
                self.probe,
                &self.config.registry,
                &request.base_image,
            )?);
        }
        let base_image = lease
            .as_ref()
            .and_then(|l| l.resolved_base_image())
            .unwrap_or(&request.base_image)
            .to_string();

        ensure_builder(self.runner, &self.config.builder_name, lease.as_ref(), context)?;
        let logs = BuildLogs::prepare(&self.config.log_dir, &request.image_id)?;

        self.enter(Stage::Building);
        info!(
            "Building the Docker image '{}', using the base image '{}', with active user '{}' and 'ROS{}-{}'",
            request.image_id, base_image, request.user, request.distro.ros_version, request.distro.name
        );
        let command = build_command(request, &self.config.builder_name, &base_image, context, Utc::now());
        info!("Executing command:\n{}", command);
        let output = self.runner.run(&command, &OutputMode::Tee(logs.complete.clone()))?;
        if output.success() {
            print_build_success(request);
        } else {
            print_build_failed(
                request,
                &BuildError::ExternalTool(format!("docker build exited with code {}", output.status)),
            );
        }

        self.enter(Stage::PostProcessingLogs);
        let artifacts = logs.post_process()?;
        Ok(BuildReport {
            exit_code: output.status,
            stages: Vec::new(),
            complete_log: artifacts.complete,
            specific_log: artifacts.specific,
        })
    }
}

/// Reuses the named builder, or creates one that can reach the temporary registry.
fn ensure_builder(
    runner: &dyn CommandRunner,
    builder_name: &str,
    lease: Option<&RegistryLease>,
    context: &BuildContext,
) -> Result<()> {
    let inspected = runner.run(
        &ExternalCommand::docker().args(["buildx", "inspect", builder_name]),
        &OutputMode::Capture,
    )?;
    if inspected.success() {
        info!("Using existing builder '{}'", builder_name);
        return Ok(());
    }

    info!("Creating builder '{}'", builder_name);
    let mut create = ExternalCommand::docker().args([
        "buildx",
        "create",
        "--name",
        builder_name,
        "--driver",
        "docker-container",
        "--driver-opt",
        "network=host",
    ]);
    if let Some(lease) = lease {
        let config = context.write_file(BUILDKITD_CONFIG, &buildkitd_config(lease.registry_address()))?;
        create = create.arg("--config").arg(config.to_string_lossy());
    }
    let created = runner.run(&create, &OutputMode::Capture)?;
    if !created.success() {
        return Err(BuildError::ExternalTool(format!(
            "Could not create builder '{}': {}",
            builder_name,
            created.stderr.trim()
        )));
    }
    Ok(())
}

fn buildkitd_config(registry_address: &str) -> String {
    format!("[registry.\"{}\"]\n  http = true\n  insecure = true\n", registry_address)
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub fn build_args(request: &BuildRequest, base_image: &str) -> Vec<(&'static str, String)> {
    vec![
        ("BASE_IMG", base_image.to_string()),
        ("REQUESTED_USER", request.user.clone()),
        ("REQUESTED_USER_HOME", request.user_home()),
        ("ROS_DISTRO", request.distro.name.clone()),
        ("ROS_VERSION", request.distro.ros_version.major().to_string()),
        ("USE_NVIDIA", flag(request.nvidia).to_string()),
        (
            "USE_BASE_IMG_ENTRYPOINT",
            flag(request.entrypoint == EntrypointSource::Inherit).to_string(),
        ),
        (
            "USE_ENVIRONMENT",
            flag(request.environment != EnvironmentSource::Disabled).to_string(),
        ),
    ]
}

pub fn labels(request: &BuildRequest, created: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        (CREATED_LABEL, created.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("org.opencontainers.image.title", request.metadata.title.clone()),
        ("org.opencontainers.image.description", request.metadata.description.clone()),
        ("org.opencontainers.image.authors", request.metadata.authors.clone()),
    ]
}

pub fn build_command(
    request: &BuildRequest,
    builder_name: &str,
    base_image: &str,
    context: &BuildContext,
    created: DateTime<Utc>,
) -> ExternalCommand {
    let mut command = ExternalCommand::docker().env("DOCKER_BUILDKIT", "1").args([
        "buildx",
        "build",
        "--builder",
        builder_name,
        "--platform",
        request.platform.as_str(),
    ]);
    command = command
        .arg("--file")
        .arg(context.dockerfile().to_string_lossy())
        .args(["--progress=plain", "--load"]);
    if request.pull {
        command = command.arg("--pull");
    }
    if !request.use_cache {
        command = command.arg("--no-cache");
    }
    for (key, value) in build_args(request, base_image) {
        command = command.arg("--build-arg").arg(format!("{}={}", key, value));
    }
    for (key, value) in labels(request, created) {
        command = command.arg("--label").arg(format!("{}={}", key, value));
    }
    command
        .arg("--tag")
        .arg(request.image_id.to_string())
        .arg(context.path().to_string_lossy())
}

fn print_build_success(request: &BuildRequest) {
    println!(
        "{}",
        format!(
            r#"
Docker build process ended with SUCCESS for the image '{}'
"#,
            request.image_id
        )
        .green()
    );
}

fn print_build_failed(request: &BuildRequest, err: &BuildError) {
    println!(
        "{}",
        format!(
            r#"
Docker build process ended with FAILURE for the image '{}'

{}
"#,
            request.image_id, err
        )
        .red()
    );
}
