use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::TempDir;

use crate::config::distro::RosVersion;
use crate::const_data::{CONTEXT_DIR_PREFIX, ROS_DISTRO_PLACEHOLDER};
use crate::error::{BuildError, Result};
use crate::request::{BuildRequest, EntrypointSource, EnvironmentSource};
use crate::util::file::{non_empty_file, set_mode};

pub const DOCKERFILE: &str = "Dockerfile";
pub const ENVIRONMENT_FILE: &str = "environment.sh";
pub const MESA_INSTALLER: &str = "install_mesa_packages.sh";
pub const PACKAGE_LIST: &str = "packages.txt";
pub const ENV_VARS_FILE: &str = "env_vars.txt";

/// Sources that must have content, an empty one is as bad as a missing one.
const NON_EMPTY_ITEMS: [&str; 2] = [PACKAGE_LIST, ENV_VARS_FILE];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// File name relative to the resources directory
    Resource(String),
    /// Absolute path supplied by the user
    File(PathBuf),
    /// Created empty in the context
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextItem {
    pub dest: String,
    pub source: ItemSource,
    pub executable: bool,
}

impl ContextItem {
    fn resource(dest: &str, name: &str, executable: bool) -> ContextItem {
        ContextItem {
            dest: dest.to_string(),
            source: ItemSource::Resource(name.to_string()),
            executable,
        }
    }

    fn script(name: &str) -> ContextItem {
        ContextItem::resource(name, name, true)
    }
}

/// The files the build needs, ordered by destination name.
pub fn manifest(request: &BuildRequest, oldest_os_version: &str) -> Vec<ContextItem> {
    let ros_major = request.distro.ros_version.major();
    let mut items = vec![
        ContextItem::resource(DOCKERFILE, DOCKERFILE, false),
        ContextItem::script("install_base_system.sh"),
        mesa_installer(request, oldest_os_version),
        ContextItem::script("install_ros.sh"),
        ContextItem::resource(PACKAGE_LIST, &format!("packages_ros{}.txt", ros_major), false),
        ContextItem::resource(ENV_VARS_FILE, &format!("env_vars_ros{}.txt", ros_major), false),
        ContextItem::script("rosdep_init_update.sh"),
        ContextItem::resource("rosbuild.sh", &format!("ros{}build.sh", ros_major), true),
        ContextItem::script("deduplicate_path.sh"),
        ContextItem::script("dot_bash_aliases"),
    ];
    if request.distro.ros_version == RosVersion::Ros2 {
        items.push(ContextItem::resource("rosdep_ignored_keys.yaml", "rosdep_ignored_keys_ros2.yaml", false));
        items.push(ContextItem::script("colcon_mixin_metadata.sh"));
    }
    match &request.entrypoint {
        EntrypointSource::Default => items.push(ContextItem::script("entrypoint.sh")),
        EntrypointSource::Custom(path) => items.push(ContextItem {
            dest: "entrypoint.sh".to_string(),
            source: ItemSource::File(path.clone()),
            executable: true,
        }),
        EntrypointSource::Inherit => {}
    }
    match &request.environment {
        EnvironmentSource::Default => items.push(ContextItem::resource(
            ENVIRONMENT_FILE,
            &format!("environment_ros{}.sh", ros_major),
            true,
        )),
        EnvironmentSource::Custom(path) => items.push(ContextItem {
            dest: ENVIRONMENT_FILE.to_string(),
            source: ItemSource::File(path.clone()),
            executable: true,
        }),
        EnvironmentSource::Disabled => {}
    }
    items.sort_by(|a, b| a.dest.cmp(&b.dest));
    items
}

/// NVIDIA hosts bring their own GL stack, but the Dockerfile still copies the
/// installer, so it exists as an empty file.
fn mesa_installer(request: &BuildRequest, oldest_os_version: &str) -> ContextItem {
    if request.nvidia {
        return ContextItem {
            dest: MESA_INSTALLER.to_string(),
            source: ItemSource::Empty,
            executable: true,
        };
    }
    let name = if request.distro.os_version == oldest_os_version {
        "install_legacy_mesa_packages.sh"
    } else {
        "install_default_mesa_packages.sh"
    };
    ContextItem::resource(MESA_INSTALLER, name, true)
}

/// Fresh per-run directory handed to the build as its complete input.
pub struct BuildContext {
    dir: TempDir,
}

impl BuildContext {
    /// Checks every source first; the directory is only created once all of them exist.
    pub fn assemble(request: &BuildRequest, resources_dir: &Path, oldest_os_version: &str) -> Result<BuildContext> {
        let items = manifest(request, oldest_os_version);
        let sources = resolve_sources(&items, resources_dir)?;

        let dir = tempfile::Builder::new().prefix(CONTEXT_DIR_PREFIX).tempdir()?;
        info!("Created temporary context directory '{}'", dir.path().display());
        let context = BuildContext { dir };
        install(&items, sources, context.path(), &request.distro.name)?;
        Ok(context)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn dockerfile(&self) -> PathBuf {
        self.path().join(DOCKERFILE)
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Best effort; a failure is logged and reported, never raised.
    pub fn cleanup(self) -> bool {
        let path = self.path().to_path_buf();
        if !path.exists() {
            return true;
        }
        match self.dir.close() {
            Ok(()) => {
                debug!("Removed context directory '{}'", path.display());
                true
            }
            Err(err) => {
                warn!("Could not remove context directory '{}': {:#}", path.display(), err);
                false
            }
        }
    }
}

/// Same files as [`BuildContext::assemble`], written to a directory that is kept.
pub fn export(request: &BuildRequest, resources_dir: &Path, oldest_os_version: &str, dest_dir: &Path) -> Result<()> {
    let items = manifest(request, oldest_os_version);
    let sources = resolve_sources(&items, resources_dir)?;
    fs::create_dir_all(dest_dir)?;
    install(&items, sources, dest_dir, &request.distro.name)
}

fn install(items: &[ContextItem], sources: Vec<Option<PathBuf>>, dir: &Path, distro: &str) -> Result<()> {
    for (item, source) in items.iter().zip(sources) {
        let dest = dir.join(&item.dest);
        debug!("Creating file '{}'", dest.display());
        match source {
            Some(source) => {
                fs::copy(&source, &dest)?;
            }
            None => {
                fs::File::create(&dest)?;
            }
        }
        set_mode(&dest, item.executable)?;
    }
    if items.iter().any(|i| i.dest == ENVIRONMENT_FILE) {
        substitute_placeholder(&dir.join(ENVIRONMENT_FILE), distro)?;
    }
    Ok(())
}

/// Checks every source up front, nothing is written unless all of them are usable.
fn resolve_sources(items: &[ContextItem], resources_dir: &Path) -> Result<Vec<Option<PathBuf>>> {
    items.iter().map(|item| resolve_source(item, resources_dir)).collect()
}

fn resolve_source(item: &ContextItem, resources_dir: &Path) -> Result<Option<PathBuf>> {
    let path = match &item.source {
        ItemSource::Empty => return Ok(None),
        ItemSource::Resource(name) => resources_dir.join(name),
        ItemSource::File(path) => path.clone(),
    };
    if !path.exists() {
        return Err(BuildError::Precondition(format!(
            "Required resource '{}' does not exist",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(BuildError::Precondition(format!(
            "Required resource '{}' is not a file",
            path.display()
        )));
    }
    if NON_EMPTY_ITEMS.contains(&item.dest.as_str()) && !non_empty_file(&path) {
        return Err(BuildError::Precondition(format!("File '{}' is empty", path.display())));
    }
    Ok(Some(path))
}

fn substitute_placeholder(path: &Path, distro: &str) -> Result<()> {
    let text = fs::read_to_string(path)?;
    if text.contains(ROS_DISTRO_PLACEHOLDER) {
        fs::write(path, text.replace(ROS_DISTRO_PLACEHOLDER, distro))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::config::cmd::CmdArgs;
    use crate::config::distro::DistroTable;

    pub const RESOURCES: &[&str] = &[
        "Dockerfile",
        "install_base_system.sh",
        "install_legacy_mesa_packages.sh",
        "install_default_mesa_packages.sh",
        "install_ros.sh",
        "packages_ros1.txt",
        "packages_ros2.txt",
        "env_vars_ros1.txt",
        "env_vars_ros2.txt",
        "rosdep_init_update.sh",
        "ros1build.sh",
        "ros2build.sh",
        "deduplicate_path.sh",
        "dot_bash_aliases",
        "rosdep_ignored_keys_ros2.yaml",
        "colcon_mixin_metadata.sh",
        "entrypoint.sh",
        "environment_ros1.sh",
        "environment_ros2.sh",
    ];

    /// A resources directory with every file the manifest can ask for.
    pub fn resources_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in RESOURCES {
            let body = match *name {
                "environment_ros1.sh" | "environment_ros2.sh" => "source /opt/ros/__ROS_DISTRO__/setup.bash\n".to_string(),
                other => format!("# {}\n", other),
            };
            fs::write(dir.path().join(name), body).unwrap();
        }
        dir
    }

    pub fn request(distro: &str, nvidia: bool) -> BuildRequest {
        let cmd_args = CmdArgs {
            img_id: Some("myimg".to_string()),
            user: Some("alice".to_string()),
            ros_distro: Some(distro.to_string()),
            nvidia,
            ..CmdArgs::default()
        };
        BuildRequest::from_args(&cmd_args, &DistroTable::default(), "x86_64").unwrap()
    }

    fn dests(items: &[ContextItem]) -> Vec<&str> {
        items.iter().map(|i| i.dest.as_str()).collect()
    }

    #[test]
    fn ros1_manifest_skips_ros2_only_files() {
        let items = manifest(&request("noetic", false), "20.04");
        let names = dests(&items);
        assert!(!names.contains(&"rosdep_ignored_keys.yaml"));
        assert!(!names.contains(&"colcon_mixin_metadata.sh"));
        assert!(names.contains(&"entrypoint.sh"));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        let packages = items.iter().find(|i| i.dest == PACKAGE_LIST).unwrap();
        assert_eq!(packages.source, ItemSource::Resource("packages_ros1.txt".to_string()));
    }

    #[test]
    fn ros2_manifest_adds_rosdep_and_colcon_files() {
        let names = manifest(&request("humble", false), "20.04")
            .into_iter()
            .map(|i| i.dest)
            .collect::<Vec<_>>();
        assert!(names.contains(&"rosdep_ignored_keys.yaml".to_string()));
        assert!(names.contains(&"colcon_mixin_metadata.sh".to_string()));
    }

    #[test]
    fn mesa_installer_selection() {
        let mesa = |distro: &str, nvidia: bool| {
            manifest(&request(distro, nvidia), "20.04")
                .into_iter()
                .find(|i| i.dest == MESA_INSTALLER)
                .unwrap()
                .source
        };
        assert_eq!(mesa("noetic", true), ItemSource::Empty);
        assert_eq!(mesa("noetic", false), ItemSource::Resource("install_legacy_mesa_packages.sh".to_string()));
        assert_eq!(mesa("jazzy", false), ItemSource::Resource("install_default_mesa_packages.sh".to_string()));
    }

    #[test]
    fn inherited_entrypoint_and_disabled_environment_are_left_out() {
        let mut req = request("humble", false);
        req.entrypoint = EntrypointSource::Inherit;
        req.environment = EnvironmentSource::Disabled;
        let items = manifest(&req, "20.04");
        let names = dests(&items);
        assert!(!names.contains(&"entrypoint.sh"));
        assert!(!names.contains(&ENVIRONMENT_FILE));
    }

    #[test]
    fn assemble_copies_sets_modes_and_substitutes() -> Result<()> {
        let resources = resources_dir();
        let context = BuildContext::assemble(&request("humble", true), resources.path(), "20.04")?;
        let dir = context.path().to_path_buf();

        let environment = fs::read_to_string(dir.join(ENVIRONMENT_FILE))?;
        assert_eq!(environment, "source /opt/ros/humble/setup.bash\n");

        let mesa = dir.join(MESA_INSTALLER);
        assert_eq!(mesa.metadata()?.len(), 0);
        assert_eq!(mesa.metadata()?.permissions().mode() & 0o777, 0o775);
        assert_eq!(dir.join(DOCKERFILE).metadata()?.permissions().mode() & 0o777, 0o664);
        assert_eq!(fs::read_to_string(dir.join("rosbuild.sh"))?, "# ros2build.sh\n");
        assert!(dir.join("rosdep_ignored_keys.yaml").is_file());

        assert!(context.cleanup());
        assert!(!dir.exists());
        Ok(())
    }

    #[test]
    fn missing_resource_aborts_before_creating_the_context() {
        let resources = resources_dir();
        fs::remove_file(resources.path().join("install_ros.sh")).unwrap();
        match BuildContext::assemble(&request("noetic", false), resources.path(), "20.04") {
            Err(BuildError::Precondition(message)) => assert!(message.contains("install_ros.sh")),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("context should not be assembled"),
        }
    }

    #[test]
    fn empty_package_list_is_rejected() {
        let resources = resources_dir();
        fs::write(resources.path().join("packages_ros2.txt"), "").unwrap();
        let result = BuildContext::assemble(&request("jazzy", false), resources.path(), "20.04");
        assert!(matches!(result, Err(BuildError::Precondition(_))));
    }

    #[test]
    fn env_vars_file_is_copied_and_must_not_be_empty() -> Result<()> {
        let resources = resources_dir();
        let context = BuildContext::assemble(&request("noetic", false), resources.path(), "20.04")?;
        assert_eq!(fs::read_to_string(context.path().join(ENV_VARS_FILE))?, "# env_vars_ros1.txt\n");
        context.cleanup();

        fs::write(resources.path().join("env_vars_ros1.txt"), "").unwrap();
        match BuildContext::assemble(&request("noetic", false), resources.path(), "20.04") {
            Err(BuildError::Precondition(message)) => assert!(message.contains("env_vars_ros1.txt")),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("empty env vars file should be rejected"),
        }
        Ok(())
    }

    #[test]
    fn export_writes_into_a_kept_directory() -> Result<()> {
        let resources = resources_dir();
        let out = tempfile::tempdir()?;
        let dest = out.path().join("myimg");
        export(&request("humble", false), resources.path(), "20.04", &dest)?;
        assert!(dest.join(DOCKERFILE).is_file());
        assert!(dest.join("colcon_mixin_metadata.sh").is_file());
        assert_eq!(fs::read_to_string(dest.join(ENVIRONMENT_FILE))?, "source /opt/ros/humble/setup.bash\n");
        Ok(())
    }
}
