use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("required input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("input file {file} is missing required column '{column}'")]
    MissingColumn { file: String, column: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV read failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scratch space ceiling of {limit_bytes} bytes exceeded")]
    ScratchExhausted { limit_bytes: u64 },

    #[error("detector {signal_type} failed: {source}")]
    Detector {
        signal_type: &'static str,
        #[source]
        source: Box<EngineError>,
    },

    #[error("detector task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
