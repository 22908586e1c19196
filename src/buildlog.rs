use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use log::{info, warn};
use regex::bytes::Regex;

use crate::const_data::{LOG_TIMESTAMP_FORMAT, SPECIFIC_LOG_PATTERN};
use crate::error::Result;
use crate::request::ImageId;
use crate::util::file::{non_empty_file, PathExt};

/// The two log files of one build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLogs {
    pub complete: PathBuf,
    pub specific: PathBuf,
}

/// What is left on disk after post-processing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogArtifacts {
    pub complete: Option<PathBuf>,
    pub specific: Option<PathBuf>,
}

impl BuildLogs {
    pub fn new(log_dir: &Path, image_id: &ImageId, now: DateTime<Utc>) -> BuildLogs {
        let stem = format!(
            "build_img_{}_{}",
            image_id.sanitized(),
            now.format(LOG_TIMESTAMP_FORMAT)
        );
        BuildLogs {
            complete: log_dir.join(format!("{}_complete.log", stem)),
            specific: log_dir.join(format!("{}_specific.log", stem)),
        }
    }

    /// Creates the log directory if needed.
    pub fn prepare(log_dir: &Path, image_id: &ImageId) -> Result<BuildLogs> {
        fs::create_dir_all(log_dir)?;
        let logs = BuildLogs::new(log_dir, image_id, Utc::now());
        info!("Build output is logged to '{}'", logs.complete.display());
        Ok(logs)
    }

    /// Splits the complete log, then drops whichever file ended up empty.
    pub fn post_process(&self) -> Result<LogArtifacts> {
        if !self.complete.exists() {
            warn!("Build log '{}' was never written", self.complete.display());
            return Ok(LogArtifacts::default());
        }
        split_log(&self.complete, &self.specific)?;

        let specific = keep_if_non_empty(&self.specific)?;
        match &specific {
            Some(path) => info!("Specific log written to '{}'", path.display()),
            None => info!("No timestamped lines found, specific log removed"),
        }
        let complete = keep_if_non_empty(&self.complete)?;
        Ok(LogArtifacts { complete, specific })
    }
}

fn keep_if_non_empty(path: &Path) -> Result<Option<PathBuf>> {
    if non_empty_file(path) {
        return Ok(Some(path.to_path_buf()));
    }
    path.remove()?;
    Ok(None)
}

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(SPECIFIC_LOG_PATTERN).expect("static timestamp pattern"))
}

/// Moves every `[YYYY-MM-DD_HH-MM-SS]` token out of `complete` into `specific`.
/// Only the token is written to `specific`; its whole line leaves `complete`.
/// Lines that stay are kept byte for byte. Returns the number of extracted tokens.
pub fn split_log(complete: &Path, specific: &Path) -> Result<usize> {
    let raw = fs::read(complete)?;

    let mut kept = Vec::with_capacity(raw.len());
    let mut tokens = Vec::new();
    let mut count = 0;
    for line in raw.split_inclusive(|b| *b == b'\n') {
        match timestamp_pattern().find(line) {
            Some(token) => {
                tokens.extend_from_slice(token.as_bytes());
                tokens.push(b'\n');
                count += 1;
            }
            None => kept.extend_from_slice(line),
        }
    }
    fs::write(specific, tokens)?;
    fs::write(complete, kept)?;
    Ok(count)
}
