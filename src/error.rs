use thiserror::Error;

/// Classifies rule compiler failures for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// The compiler process could not be started
    Spawn,
    /// The compiler exceeded its wall-clock budget and was killed
    Timeout,
    /// The compiler exited with a non-zero status
    NonZeroExit,
    /// The compiler exited cleanly but wrote no output file
    MissingOutput,
    /// The compiler wrote a zero-byte output file
    EmptyOutput,
}

/// Rule set build error types
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Compile error: {message}")]
    Compile {
        kind: CompileErrorKind,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ForgeError {
    pub(crate) fn compile(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        ForgeError::Compile {
            kind,
            message: message.into(),
        }
    }

    /// Returns the compiler failure kind, if this is a compile error.
    pub fn compile_kind(&self) -> Option<CompileErrorKind> {
        match self {
            ForgeError::Compile { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
