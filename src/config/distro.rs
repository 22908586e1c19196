use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RosVersion {
    Ros1,
    Ros2,
}

impl RosVersion {
    pub fn major(&self) -> u8 {
        match self {
            RosVersion::Ros1 => 1,
            RosVersion::Ros2 => 2,
        }
    }
}

impl Display for RosVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.major())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosDistro {
    pub name: String,
    pub ros_version: RosVersion,
    /// Ubuntu release the distro targets, e.g. `20.04`
    pub os_version: String,
}

impl RosDistro {
    pub fn default_base_image(&self) -> String {
        format!("ubuntu:{}", self.os_version)
    }
}

/// Known ROS distros. Built once at start-up and handed around by reference.
#[derive(Debug, Clone)]
pub struct DistroTable {
    distros: BTreeMap<String, RosDistro>,
}

const DISTROS: &[(&str, RosVersion, &str)] = &[
    ("noetic", RosVersion::Ros1, "20.04"),
    ("humble", RosVersion::Ros2, "22.04"),
    ("jazzy", RosVersion::Ros2, "24.04"),
];

impl Default for DistroTable {
    fn default() -> Self {
        DistroTable::from_entries(DISTROS)
    }
}

impl DistroTable {
    pub fn from_entries(entries: &[(&str, RosVersion, &str)]) -> DistroTable {
        let distros = entries
            .iter()
            .map(|(name, ros_version, os_version)| {
                (
                    name.to_string(),
                    RosDistro {
                        name: name.to_string(),
                        ros_version: *ros_version,
                        os_version: os_version.to_string(),
                    },
                )
            })
            .collect();
        DistroTable { distros }
    }

    pub fn get(&self, name: &str) -> Option<&RosDistro> {
        self.distros.get(name)
    }

    /// Distros ordered by (ros version, os version, name).
    pub fn sorted(&self) -> Vec<&RosDistro> {
        let mut distros = self.distros.values().collect::<Vec<_>>();
        distros.sort_by(|a, b| {
            (a.ros_version, &a.os_version, &a.name).cmp(&(b.ros_version, &b.os_version, &b.name))
        });
        distros
    }

    /// The oldest OS release any distro targets.
    pub fn oldest_os_version(&self) -> Option<&str> {
        self.distros.values().map(|d| d.os_version.as_str()).min()
    }

    pub fn help_listing(&self) -> String {
        let mut lines = vec!["Available ROS distros:".to_string()];
        for distro in self.sorted() {
            lines.push(format!(
                "    {:<6}: ros{}, ubuntu {}.",
                distro.name, distro.ros_version, distro.os_version
            ));
        }
        lines.join("\n")
    }
}
