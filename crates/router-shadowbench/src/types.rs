use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShadowBenchError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock error: {0}")]
    Lock(String),
}

pub type ShadowBenchResult<T> = Result<T, ShadowBenchError>;
