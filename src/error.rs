use colored::Colorize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BuildError>;

const BANNER_WIDTH: usize = 72;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Missing or malformed flags. Carries the usage text to print.
    #[error("{0}")]
    Usage(String),

    #[error("{message}")]
    Validation { message: String, detail: Option<String> },

    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    ExternalTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    pub fn validation(message: impl Into<String>) -> BuildError {
        BuildError::Validation {
            message: message.into(),
            detail: None,
        }
    }

    pub fn validation_with_detail(message: impl Into<String>, detail: impl Into<String>) -> BuildError {
        BuildError::Validation {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Prints the error to stderr the way the CLI shows it to the user.
    pub fn report(&self) {
        match self {
            BuildError::Usage(usage) => eprintln!("{}", usage),
            BuildError::Validation {
                message,
                detail: Some(detail),
            } => {
                eprintln!("{}", banner(message).red());
                eprintln!("{}", detail);
            }
            other => eprintln!("{}", banner(&other.to_string()).red()),
        }
    }
}

/// Frames a message between two rows of asterisks.
pub fn banner(message: &str) -> String {
    let border = "*".repeat(BANNER_WIDTH);
    format!("{border}\n* Error: {message}\n{border}")
}
