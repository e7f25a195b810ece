use thiserror::Error;

#[derive(Debug, Error)]
pub enum TidemarkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("batch apply failed: {0}")]
    Apply(String),

    #[error("watermark error: {0}")]
    Watermark(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type TidemarkResult<T> = Result<T, TidemarkError>;
