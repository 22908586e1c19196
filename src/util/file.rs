use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use home::home_dir;

pub const EXECUTABLE_MODE: u32 = 0o775;
pub const REGULAR_MODE: u32 = 0o664;

/// Removes a file or a whole directory tree. A missing path is not an error.
pub fn remove(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_dir() {
        fs::remove_dir_all(path)?
    } else {
        fs::remove_file(path)?
    }
    Ok(())
}

pub fn set_mode(path: &Path, executable: bool) -> Result<()> {
    let mode = if executable { EXECUTABLE_MODE } else { REGULAR_MODE };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

pub fn non_empty_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// `~/x` -> `$HOME/x`. Anything else is returned as is.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

pub trait PathExt {
    fn remove(&self) -> Result<()>;
}

impl PathExt for Path {
    fn remove(&self) -> Result<()> {
        remove(self)
    }
}

impl PathExt for PathBuf {
    fn remove(&self) -> Result<()> {
        remove(self)
    }
}
