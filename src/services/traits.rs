// Port definitions for the advisor's external collaborators
//
// Each evidence source and the configuration backend sit behind a trait so
// the orchestrator can be driven by real adapters in production and by
// mockall mocks in unit tests. All traits are Send + Sync: the two evidence
// sources are queried concurrently on the tokio runtime.

use crate::error::Result;
use crate::evidence::{GradeQuery, GradeResult, OpinionQuery, OpinionResult};
use crate::synthesizer::DifficultyPolicy;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::path::PathBuf;
use std::time::Duration;

/// Structured historical grade data
///
/// Implementations are strictly read-only.
///
/// Usage:
///     let grades: Arc<dyn GradeSource> = Arc::new(SqliteGradeSource::new("grades.db"));
///     let result = grades.average_gpa(&query).await?;
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GradeSource: Send + Sync {
    /// Average normalized GPA estimate over the matching sections
    ///
    /// Returns a result with `metric: None` when no rows match.
    ///
    /// # Errors
    /// - DataSourceUnavailable if the store cannot be opened or queried
    async fn average_gpa(&self, query: &GradeQuery) -> Result<GradeResult>;
}

/// Unstructured student opinion text from a community forum
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OpinionSource: Send + Sync {
    /// Search recent posts, most relevant first, at most five
    ///
    /// # Errors
    /// - DataSourceUnavailable on authentication or network failure
    async fn search(&self, query: &OpinionQuery) -> Result<OpinionResult>;
}

/// Reddit script-app credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Configuration service for advisor settings
///
/// Loaded once at startup; implementations must be immutable afterwards.
#[cfg_attr(test, automock)]
pub trait ConfigService: Send + Sync {
    /// Path to the SQLite grade store
    fn grades_db_path(&self) -> PathBuf;

    /// Reddit credentials, if configured
    fn reddit_credentials(&self) -> Option<RedditCredentials>;

    /// User-Agent sent to Reddit (required by their API rules)
    fn reddit_user_agent(&self) -> String;

    /// Community searched for opinions
    fn subreddit(&self) -> String;

    /// Per-source call timeout
    fn source_timeout(&self) -> Duration;

    /// OpenRouter key; enables LLM parsing and phrasing when present
    fn llm_api_key(&self) -> Option<String>;

    /// Model used for parsing and phrasing
    fn model(&self) -> String;

    /// Difficulty thresholds and keyword sets
    ///
    /// # Errors
    /// - Policy file unreadable or invalid
    fn difficulty_policy(&self) -> Result<DifficultyPolicy>;
}
