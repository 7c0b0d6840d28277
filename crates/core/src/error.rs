use thiserror::Error;

#[derive(Error, Debug)]
pub enum StashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid config: {0}")]
    Config(String),
}

impl From<serde_json::Error> for StashError {
    fn from(e: serde_json::Error) -> Self {
        StashError::Serialize(e.to_string())
    }
}
