use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid module registry: {reason}")]
    InvalidModuleRegistry { reason: String },

    #[error("Duplicate module name: {name}")]
    DuplicateModule { name: String },

    #[error("Invalid seed {seed:?}: {reason}")]
    InvalidSeed { seed: String, reason: String },

    #[error("Invalid {event_type} event: {reason}")]
    InvalidEvent { event_type: String, reason: String },

    #[error("Cycle detected: event {event_id} appears in its own parent chain ({} ancestors)", chain.len())]
    CycleDetected { event_id: String, chain: Vec<String> },

    #[error("Scan was cancelled")]
    Cancelled,

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl EngineError {
    /// Graph integrity failures abort the whole scan; everything else is
    /// recovered per event or per module.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::CycleDetected { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
