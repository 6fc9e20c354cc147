// Service layer for dependency injection and testability
//
// The advisor talks to the outside world through three ports: the grade
// store, the opinion search and configuration. Traits define the ports;
// the modules below are the production adapters.
//
// Usage Example:
//     // Production code
//     let grades = Arc::new(SqliteGradeSource::new("grades_improved.db"));
//     let result = grades.average_gpa(&query).await?;
//
//     // Test code
//     let mut grades = MockGradeSource::new();
//     grades.expect_average_gpa().returning(|_| Ok(GradeResult::new(Some(3.2), "3 sections")));

pub mod config;
pub mod grades;
#[cfg(test)]
pub mod mocks;
pub mod reddit;
pub mod traits;

// Re-export commonly used types
pub use config::EnvConfigService;
pub use grades::SqliteGradeSource;
pub use reddit::RedditOpinionSource;
pub use traits::{ConfigService, GradeSource, OpinionSource, RedditCredentials};
