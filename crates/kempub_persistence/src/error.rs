use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database '{path}' within {timeout_secs}s: {source}")]
    Open {
        path: String,
        timeout_secs: u64,
        source: sled::Error,
    },
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
