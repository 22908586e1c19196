//! Argument handling of the rosimg binary. None of these runs reach docker.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary with an empty HOME so no user config leaks in.
fn rosimg_cmd(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("rosimg");
    cmd.env("HOME", home.path())
        .env_remove("ROSIMG_RESOURCES_DIR")
        .env_remove("ROSIMG_LOG_DIR")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn help_prints_usage_and_exits_1() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .arg("-h")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Usage"))
        .stderr(predicate::str::contains("--ros-distro"));
}

#[test]
fn missing_distro_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .args(["-i", "myimg", "-u", "alice"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn flag_as_value_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .args(["-i", "-u", "alice", "-v", "noetic"])
        .assert()
        .code(1);
}

#[test]
fn multi_platform_shows_banner_and_listing() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .args(["-i", "myimg", "-u", "alice", "-v", "noetic", "-P", "linux/amd64,linux/arm64"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("* Error: Only one platform can be built at a time"))
        .stderr(predicate::str::contains("linux/arm/v7"));
}

#[test]
fn unsupported_platform_shows_listing() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .args(["-i", "myimg", "-u", "alice", "-v", "noetic", "-P", "linux/386"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unsupported platform 'linux/386'"))
        .stderr(predicate::str::contains("Supported platforms:"));
}

#[test]
fn unknown_distro_lists_available_distros() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .args(["-i", "myimg", "-u", "alice", "-v", "rolling", "-P", "linux/amd64"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid ROS distro 'rolling'"))
        .stderr(predicate::str::contains("Available ROS distros:"))
        .stderr(predicate::str::contains("humble"));
}

#[test]
fn image_id_with_two_colons_is_rejected() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .args(["-i", "host:5000/name:tag", "-u", "alice", "-v", "noetic", "-P", "linux/amd64"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid image id 'host:5000/name:tag'"));
}

#[test]
fn missing_custom_entrypoint_is_reported() {
    let home = TempDir::new().unwrap();
    rosimg_cmd(&home)
        .args(["-i", "myimg", "-u", "alice", "-v", "humble", "-P", "linux/amd64"])
        .args(["-e", "/nonexistent/entrypoint.sh"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Custom entrypoint file '/nonexistent/entrypoint.sh' not found"));
}

const RESOURCES: &[&str] = &[
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

#[test]
fn output_dir_exports_without_docker() {
    let home = TempDir::new().unwrap();
    let resources = TempDir::new().unwrap();
    for name in RESOURCES {
        std::fs::write(resources.path().join(name), format!("# {}\n", name)).unwrap();
    }
    let out = TempDir::new().unwrap();
    let dest = out.path().join("humble_img");

    rosimg_cmd(&home)
        .args(["-i", "myimg", "-u", "alice", "-v", "humble", "-P", "linux/amd64"])
        .arg("--resources-dir")
        .arg(resources.path())
        .arg("--output-dir")
        .arg(&dest)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("build.sh"));

    for name in ["Dockerfile", "env_vars.txt", "build.sh", "docker-compose.yaml"] {
        assert!(dest.join(name).is_file(), "{} missing", name);
    }
    let compose = std::fs::read_to_string(dest.join("docker-compose.yaml")).unwrap();
    assert!(compose.contains("myimg_latest_cont"));
}
