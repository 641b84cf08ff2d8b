use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalystError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// A collaborator could not be constructed or reached. Never retried.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The record store rejected or failed to run a query.
    #[error("{0}")]
    QueryRejected(String),

    /// The store holds too little data to answer (e.g. fewer than two builds).
    #[error("Not enough data: {0}")]
    NotEnoughData(String),

    #[error("Audit log error: {0}")]
    Audit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl AnalystError {
    /// Whether feeding this error back to the generator can help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalystError::QueryRejected(_))
    }
}

pub type Result<T> = std::result::Result<T, AnalystError>;
