use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response; status and body are surfaced verbatim.
    #[error("{context}: {status} {text}")]
    HttpStatus {
        context: String,
        status: u16,
        text: String,
    },

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Edge {from} -> {to} references a node that is not in the graph")]
    DanglingEdge { from: String, to: String },

    #[error("Adding edge {from} -> {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Task {node_id} failed: {message}")]
    TaskFailed { node_id: String, message: String },

    #[error("Run aborted")]
    Cancelled,

    #[error("Inconsistent scheduler state: {0}")]
    InconsistentState(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// True for the aborted outcome (user stop or a superseding run).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Structural planning errors abort the run before any execution.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Planning(_) | Error::DanglingEdge { .. } | Error::Cycle { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
