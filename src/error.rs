use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepError {
    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error("Failed to parse script JSON: {0}")]
    ScriptParse(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Environment variable not found: {0}")]
    MissingVariable(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timeout {ms}ms exceeded while {what}")]
    Timeout { ms: u64, what: String },

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("AI executor error: {0}")]
    Ai(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StepError {
    /// Shorthand used by step handlers for missing or malformed fields.
    pub fn validation(message: impl Into<String>) -> Self {
        StepError::Validation(message.into())
    }

    /// True for errors raised before anything touched the page: bad job
    /// input, bad script JSON, missing step fields and unresolved variables.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StepError::InvalidInput(_)
                | StepError::ScriptParse(_)
                | StepError::Validation(_)
                | StepError::MissingVariable(_)
        )
    }
}

impl From<reqwest::Error> for StepError {
    fn from(e: reqwest::Error) -> Self {
        StepError::Ai(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StepError>;
