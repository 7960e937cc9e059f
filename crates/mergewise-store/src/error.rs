use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule not found: {0}")]
    NotFound(String),

    #[error("rule {id} has no version {version}")]
    VersionNotFound { id: String, version: u32 },

    #[error("invalid rule id: {0:?}")]
    InvalidId(String),

    #[error("i/o error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
