/// Core types and error taxonomy for the codebox runner
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Interpreter family a run is executed with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "python3")]
    Python,
    #[serde(rename = "nodejs")]
    NodeJs,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::NodeJs => "nodejs",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "nodejs" | "node" | "javascript" | "js" => Ok(Language::NodeJs),
            other => Err(SandboxError::InvalidOptions(format!(
                "unsupported language: {other}"
            ))),
        }
    }
}

/// Per-run options supplied by the caller.
///
/// `allowed_syscalls` is an ordered set: order of first occurrence is kept and
/// duplicates are dropped by [`crate::config::validator::validate_options`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub enable_network: bool,
    #[serde(default)]
    pub allowed_syscalls: Vec<String>,
}

/// A submitted run. Immutable once built.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub code: Vec<u8>,
    pub language: Language,
    pub preload: String,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub options: RunOptions,
}

impl RunRequest {
    pub fn new(language: Language, code: impl Into<Vec<u8>>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            language,
            preload: String::new(),
            stdin: None,
            timeout,
            options: RunOptions::default(),
        }
    }

    pub fn with_preload(mut self, preload: impl Into<String>) -> Self {
        self.preload = preload.into();
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

/// Custom error types for codebox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to obtain randomness: {0}")]
    Randomness(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("execution environment error: {0}")]
    Environment(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("sandbox identity error: {0}")]
    Identity(String),
}

impl SandboxError {
    /// Response code reported to callers for this error class.
    pub fn code(&self) -> i32 {
        match self {
            SandboxError::InvalidOptions(_) => -400,
            SandboxError::Unavailable(_) => -503,
            _ => -500,
        }
    }
}

impl From<nix::errno::Errno> for SandboxError {
    fn from(err: nix::errno::Errno) -> Self {
        SandboxError::Process(err.to_string())
    }
}

/// Result type alias for codebox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
