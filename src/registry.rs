//! Temporary local registry.
//!
//! `docker buildx` builders with the `docker-container` driver can not see
//! images that only live in the local docker image store. When the base image
//! must not be pulled, it is pushed to a short-lived `registry:2` container
//! and the build references it as `<gateway>:<port>/<image>`.

use std::thread::sleep;
use std::time::Duration;

use anyhow::Context;
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use url::Url;

use crate::config::RegistrySettings;
use crate::error::{BuildError, Result};
use crate::exec::{CommandOutput, CommandRunner, ExternalCommand, OutputMode};

pub trait ReadinessProbe {
    fn is_ready(&self, url: &Url) -> bool;
}

/// Plain HTTP GET; any 2xx counts as ready.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> anyhow::Result<HttpProbe> {
        let client = reqwest::blocking::ClientBuilder::new()
            .timeout(Duration::from_secs(2))
            .connect_timeout(Duration::from_secs(1))
            .build()?;
        Ok(HttpProbe { client })
    }
}

impl ReadinessProbe for HttpProbe {
    fn is_ready(&self, url: &Url) -> bool {
        match self.client.get(url.clone()).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("Registry not ready yet: {}", err);
                false
            }
        }
    }
}

#[derive(Deserialize, Debug)]
struct NetworkInspect {
    #[serde(rename = "IPAM")]
    ipam: Ipam,
}

#[derive(Deserialize, Debug)]
struct Ipam {
    #[serde(rename = "Config", default)]
    config: Vec<IpamConfig>,
}

#[derive(Deserialize, Debug)]
struct IpamConfig {
    #[serde(rename = "Gateway")]
    gateway: Option<String>,
}

/// A running temporary registry plus the retagged base image inside it.
#[derive(Debug)]
pub struct RegistryLease {
    container_name: String,
    /// `<gateway>:<port>`
    registry_address: String,
    /// Set once the retag succeeded, removed again on teardown
    tagged_reference: Option<String>,
}

impl RegistryLease {
    pub fn registry_address(&self) -> &str {
        &self.registry_address
    }

    /// The base image reference the build has to use.
    pub fn resolved_base_image(&self) -> Option<&str> {
        self.tagged_reference.as_deref()
    }

    /// Stops the registry and drops the retagged image. Failures are logged and
    /// reported through the return value; they never abort the caller.
    pub fn teardown(self, runner: &dyn CommandRunner) -> bool {
        info!("Stopping temporary registry '{}'", self.container_name);
        let mut clean = best_effort(runner, ExternalCommand::docker().args(["stop", self.container_name.as_str()]));
        if let Some(reference) = &self.tagged_reference {
            clean &= best_effort(runner, ExternalCommand::docker().args(["image", "rm", reference.as_str()]));
        }
        clean
    }
}

/// Teardown for an optional lease. `None` (the `-p` path) is a no-op.
pub fn release(lease: Option<RegistryLease>, runner: &dyn CommandRunner) -> bool {
    match lease {
        Some(lease) => lease.teardown(runner),
        None => true,
    }
}

fn best_effort(runner: &dyn CommandRunner, command: ExternalCommand) -> bool {
    match runner.run(&command, &OutputMode::Capture) {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!("'{}' failed (exit code {}): {}", command, output.status, output.stderr.trim());
            false
        }
        Err(err) => {
            warn!("'{}' could not be run: {:#}", command, err);
            false
        }
    }
}

fn capture(runner: &dyn CommandRunner, command: ExternalCommand) -> Result<CommandOutput> {
    Ok(runner.run(&command, &OutputMode::Capture)?)
}

pub fn image_exists(runner: &dyn CommandRunner, image: &str) -> Result<bool> {
    Ok(capture(runner, ExternalCommand::docker().args(["image", "inspect", image]))?.success())
}

/// Starts the registry and publishes `base_image` into it.
/// Anything already started is torn down again before an error is returned.
pub fn bootstrap(
    runner: &dyn CommandRunner,
    probe: &dyn ReadinessProbe,
    settings: &RegistrySettings,
    base_image: &str,
) -> Result<RegistryLease> {
    if !image_exists(runner, base_image)? {
        return Err(BuildError::Precondition(format!(
            "Base image '{}' not found locally. Pull it first or use -p",
            base_image
        )));
    }
    ensure_registry_image(runner, settings)?;
    remove_stale_container(runner, settings)?;

    let port_mapping = format!("{0}:{0}", settings.port);
    let started = capture(
        runner,
        ExternalCommand::docker().args([
            "run",
            "-d",
            "--rm",
            "-p",
            port_mapping.as_str(),
            "--name",
            settings.container_name.as_str(),
            settings.image.as_str(),
        ]),
    )?;
    if !started.success() {
        return Err(BuildError::ExternalTool(format!(
            "Could not start the temporary registry '{}': {}",
            settings.container_name,
            started.stderr.trim()
        )));
    }

    let mut lease = RegistryLease {
        container_name: settings.container_name.clone(),
        registry_address: String::new(),
        tagged_reference: None,
    };
    match publish(&mut lease, runner, probe, settings, base_image) {
        Ok(()) => Ok(lease),
        Err(err) => {
            lease.teardown(runner);
            Err(err)
        }
    }
}

fn publish(
    lease: &mut RegistryLease,
    runner: &dyn CommandRunner,
    probe: &dyn ReadinessProbe,
    settings: &RegistrySettings,
    base_image: &str,
) -> Result<()> {
    wait_ready(probe, settings)?;

    let gateway = bridge_gateway(runner, &settings.network)?;
    lease.registry_address = format!("{}:{}", gateway, settings.port);
    let reference = format!("{}/{}", lease.registry_address, base_image);

    let tagged = capture(runner, ExternalCommand::docker().args(["tag", base_image, reference.as_str()]))?;
    if !tagged.success() {
        return Err(BuildError::ExternalTool(format!(
            "Could not tag '{}' as '{}': {}",
            base_image,
            reference,
            tagged.stderr.trim()
        )));
    }
    lease.tagged_reference = Some(reference.clone());

    info!("Pushing '{}' to the temporary registry", reference);
    let pushed = capture(runner, ExternalCommand::docker().args(["push", reference.as_str()]))?;
    if !pushed.success() {
        return Err(BuildError::ExternalTool(format!(
            "Could not push '{}': {}",
            reference,
            pushed.combined().trim()
        )));
    }
    Ok(())
}

fn ensure_registry_image(runner: &dyn CommandRunner, settings: &RegistrySettings) -> Result<()> {
    if image_exists(runner, &settings.image)? {
        return Ok(());
    }
    info!("Pulling registry image '{}'", settings.image);
    let pulled = capture(runner, ExternalCommand::docker().args(["pull", settings.image.as_str()]))?;
    if !pulled.success() {
        return Err(BuildError::ExternalTool(format!(
            "Could not pull the registry image '{}': {}",
            settings.image,
            pulled.stderr.trim()
        )));
    }
    Ok(())
}

fn remove_stale_container(runner: &dyn CommandRunner, settings: &RegistrySettings) -> Result<()> {
    let filter = format!("name=^/{}$", settings.container_name);
    let existing = capture(runner, ExternalCommand::docker().args(["ps", "-aq", "--filter", filter.as_str()]))?;
    if existing.success() && !existing.stdout.trim().is_empty() {
        warn!("Removing leftover registry container '{}'", settings.container_name);
        let removed = capture(runner, ExternalCommand::docker().args(["rm", "-f", settings.container_name.as_str()]))?;
        if !removed.success() {
            return Err(BuildError::ExternalTool(format!(
                "Could not remove the old registry container '{}': {}",
                settings.container_name,
                removed.stderr.trim()
            )));
        }
    }
    Ok(())
}

/// Polls `/v2/` a bounded number of times at a fixed interval.
fn wait_ready(probe: &dyn ReadinessProbe, settings: &RegistrySettings) -> Result<()> {
    let url = Url::parse(&format!("http://localhost:{}/v2/", settings.port))
        .context("invalid registry readiness url")?;
    let interval = Duration::from_secs(settings.ready_interval_secs);
    for attempt in 1..=settings.ready_attempts {
        if probe.is_ready(&url) {
            info!("Temporary registry is ready at {}", url);
            return Ok(());
        }
        debug!("Registry readiness attempt {}/{} failed", attempt, settings.ready_attempts);
        if attempt < settings.ready_attempts {
            sleep(interval);
        }
    }
    Err(BuildError::ExternalTool(format!(
        "Temporary registry did not become ready after {} attempts",
        settings.ready_attempts
    )))
}

fn bridge_gateway(runner: &dyn CommandRunner, network: &str) -> Result<String> {
    let inspected = capture(runner, ExternalCommand::docker().args(["network", "inspect", network]))?;
    if !inspected.success() {
        return Err(BuildError::ExternalTool(format!(
            "Could not inspect docker network '{}': {}",
            network,
            inspected.stderr.trim()
        )));
    }
    parse_gateway(&inspected.stdout)
        .ok_or_else(|| BuildError::ExternalTool(format!("No gateway found for docker network '{}'", network)))
}

fn parse_gateway(inspect_json: &str) -> Option<String> {
    let networks = serde_json::from_str::<Vec<NetworkInspect>>(inspect_json).ok()?;
    networks
        .into_iter()
        .flat_map(|n| n.ipam.config)
        .find_map(|c| c.gateway.filter(|g| !g.is_empty()))
}
