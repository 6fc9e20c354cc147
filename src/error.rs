// Centralized error handling using thiserror for type-safe error management
//
// The advisory pipeline distinguishes three classes of failure:
// - parse-level ambiguity, surfaced to the user as a clarification request
// - evidence source failures, absorbed by the orchestrator (soft)
// - synthesis contract violations, fatal for the request that hit them
//
// Infrastructure errors (IO, HTTP, SQLite, JSON) convert automatically and
// are turned into `DataSourceUnavailable` at the source boundary.

use thiserror::Error;

/// Which evidence source produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Grades,
    Opinions,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Grades => write!(f, "grade statistics"),
            SourceKind::Opinions => write!(f, "opinion search"),
        }
    }
}

/// Main error type for the course advisor
///
/// Error Handling Strategy:
/// - AmbiguousCourse: shown to the user via `clarification()`, never retried
/// - DataSourceUnavailable: replaced by empty evidence, logged as a soft failure
/// - UnexpectedSynthesisInput: ends the current request only
/// - Everything else: setup/infrastructure failures
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// No usable subject + course number could be found in the input
    ///
    /// The string describes what was wrong (missing, 4-digit number, etc.).
    #[error("Ambiguous course reference: {0}")]
    AmbiguousCourse(String),

    /// An evidence source could not be reached or refused the request
    #[error("{kind} source unavailable: {reason}")]
    DataSourceUnavailable { kind: SourceKind, reason: String },

    /// A malformed result object reached the synthesizer
    #[error("Unexpected synthesis input: {0}")]
    UnexpectedSynthesisInput(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Required environment variable missing or invalid
    #[error("Environment error: {0}")]
    EnvError(String),

    /// Grade store build/ingestion error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Language model communication error
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
}

impl AdvisorError {
    /// Shorthand for building a source failure
    pub fn unavailable(kind: SourceKind, reason: impl Into<String>) -> Self {
        AdvisorError::DataSourceUnavailable {
            kind,
            reason: reason.into(),
        }
    }

    /// True when a source was merely unreachable
    ///
    /// The orchestrator degrades evidence on any source error; soft ones are
    /// logged as warnings, the rest as errors.
    pub fn is_soft(&self) -> bool {
        matches!(self, AdvisorError::DataSourceUnavailable { .. })
    }

    /// User-facing text for failures that end a request
    pub fn clarification(&self) -> String {
        match self {
            AdvisorError::AmbiguousCourse(detail) => format!(
                "I couldn't tell which course you mean ({}). \
                 Could you give the subject and number, like \"CS 250\" or \"CS 25000\"?",
                detail
            ),
            other => format!("Sorry, something went wrong while checking that course: {}", other),
        }
    }
}

/// Type alias for Result with AdvisorError
pub type Result<T> = std::result::Result<T, AdvisorError>;

// The LLM adapters are written against anyhow; fold their errors in here.
impl From<anyhow::Error> for AdvisorError {
    fn from(err: anyhow::Error) -> Self {
        AdvisorError::LlmError(err.to_string())
    }
}
