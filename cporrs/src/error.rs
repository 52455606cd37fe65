use thiserror::Error;

pub type Result<T> = std::result::Result<T, PortalError>;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("schema conflict: {0}")]
    SchemaConflict(String),
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("unknown aggregator: {0}")]
    UnknownAggregator(String),
    #[error("query has no measures")]
    NoMeasure,
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("query exceeded the {0} ms deadline")]
    Timeout(u64),
    #[error("remote fetch failed: {0}")]
    RemoteFetchFailed(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
