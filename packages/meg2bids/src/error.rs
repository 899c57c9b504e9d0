use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Subject {subject}: {message}")]
    SubjectData { subject: String, message: String },

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("Trigger channel resolution failed: {0}")]
    DecodeAmbiguity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvertError {
    /// Shorthand for a subject-scoped error.
    pub fn subject(subject: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::SubjectData {
            subject: subject.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
