// Mock test helpers and common mock patterns
//
// Reusable mock constructors with sensible defaults. Tests can override
// specific behaviors while inheriting baseline setup.
//
// Usage:
//     use crate::services::mocks::test_helpers::*;
//     let grades = create_mock_grades(Some(2.6));
//     let opinions = create_failing_opinions();

#[cfg(test)]
pub mod test_helpers {
    use super::super::traits::*;
    use crate::error::{AdvisorError, SourceKind};
    use crate::evidence::{GradeResult, OpinionResult};
    use crate::synthesizer::DifficultyPolicy;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Create a mock config service with test defaults
    ///
    /// Default behavior:
    /// - grades_db_path() returns "test_grades.db"
    /// - reddit_credentials() returns None
    /// - reddit_user_agent() returns "test-agent"
    /// - subreddit() returns "purdue"
    /// - source_timeout() returns 200ms
    /// - llm_api_key() returns None
    /// - model() returns "test-model"
    /// - difficulty_policy() returns the default policy
    pub fn create_mock_config() -> MockConfigService {
        let mut mock = MockConfigService::new();

        mock.expect_grades_db_path()
            .returning(|| PathBuf::from("test_grades.db"));
        mock.expect_reddit_credentials().returning(|| None);
        mock.expect_reddit_user_agent()
            .returning(|| "test-agent".to_string());
        mock.expect_subreddit().returning(|| "purdue".to_string());
        mock.expect_source_timeout()
            .returning(|| Duration::from_millis(200));
        mock.expect_llm_api_key().returning(|| None);
        mock.expect_model().returning(|| "test-model".to_string());
        mock.expect_difficulty_policy()
            .returning(|| Ok(DifficultyPolicy::default()));

        mock
    }

    /// Grade source answering every query with the same metric
    pub fn create_mock_grades(metric: Option<f64>) -> MockGradeSource {
        let mut mock = MockGradeSource::new();
        mock.expect_average_gpa()
            .returning(move |_| Ok(GradeResult::new(metric, "mock sections")));
        mock
    }

    /// Opinion source answering every query with the same titles
    pub fn create_mock_opinions(titles: Vec<&'static str>) -> MockOpinionSource {
        let mut mock = MockOpinionSource::new();
        mock.expect_search().returning(move |_| {
            Ok(OpinionResult::new(
                titles.iter().map(|t| t.to_string()).collect(),
            ))
        });
        mock
    }

    /// Opinion source that always reports an authentication failure
    pub fn create_failing_opinions() -> MockOpinionSource {
        let mut mock = MockOpinionSource::new();
        mock.expect_search().returning(|_| {
            Err(AdvisorError::unavailable(
                SourceKind::Opinions,
                "authentication failed with status 401 Unauthorized",
            ))
        });
        mock
    }
}
