// AppBuilder pattern for dependency construction and injection
//
// Production wiring reads the environment once and builds the SQLite grade
// source, the Reddit opinion source and, when an OpenRouter key is present,
// the LLM-backed parser and phraser. Any port can be overridden, which is
// how tests swap in mocks and stubs.
//
// Usage Example:
//     // Production
//     let deps = AppBuilder::new()
//         .with_production_deps()?
//         .build()?;
//
//     // Testing
//     let deps = AppBuilder::new()
//         .with_test_deps()
//         .with_grade_source(Arc::new(grades))
//         .build()?;

use crate::advisor::Advisor;
use crate::error::{AdvisorError, Result};
use crate::events::EventBus;
use crate::intent::{LlmQuestionParser, QuestionParser, RuleQuestionParser};
use crate::llm::{AdapterType, LlmAdapter};
use crate::phrasing::VerdictPhraser;
use crate::services::{
    ConfigService, EnvConfigService, GradeSource, OpinionSource, RedditOpinionSource,
    SqliteGradeSource,
};
use crate::synthesizer::{DifficultyPolicy, EvidenceSynthesizer};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Builder for constructing the advisor with dependency injection
pub struct AppBuilder {
    // Optional overrides (for testing)
    config: Option<Arc<dyn ConfigService>>,
    parser: Option<Arc<dyn QuestionParser>>,
    grades: Option<Arc<dyn GradeSource>>,
    opinions: Option<Arc<dyn OpinionSource>>,
    policy: Option<DifficultyPolicy>,
    source_timeout: Option<Duration>,

    // Infrastructure
    event_bus: Option<Arc<EventBus>>,
    llm_adapter: Option<Arc<dyn LlmAdapter>>,
    use_llm: bool,
}

impl AppBuilder {
    /// Create a new AppBuilder with default configuration
    pub fn new() -> Self {
        Self {
            config: None,
            parser: None,
            grades: None,
            opinions: None,
            policy: None,
            source_timeout: None,
            event_bus: None,
            llm_adapter: None,
            use_llm: true,
        }
    }

    /// Use production dependencies
    ///
    /// Loads `EnvConfigService` unless a config was injected, then fills in
    /// every port that was not overridden:
    /// - SqliteGradeSource on GRADES_DB_PATH
    /// - RedditOpinionSource on REDDIT_SUBREDDIT
    /// - OpenRouter adapter when OPENROUTER_API_KEY is set
    ///
    /// # Errors
    ///
    /// Returns error if the environment is inconsistent or the difficulty
    /// policy file cannot be loaded.
    pub fn with_production_deps(mut self) -> Result<Self> {
        let config = match self.config.clone() {
            Some(config) => config,
            None => Arc::new(EnvConfigService::load()?) as Arc<dyn ConfigService>,
        };

        if self.grades.is_none() {
            self.grades = Some(Arc::new(SqliteGradeSource::new(config.grades_db_path())));
        }

        if self.opinions.is_none() {
            self.opinions = Some(Arc::new(RedditOpinionSource::new(
                config.reddit_credentials(),
                config.reddit_user_agent(),
                config.subreddit(),
            )));
        }

        if self.llm_adapter.is_none() && self.use_llm {
            self.llm_adapter = config.llm_api_key().map(|key| {
                Arc::from(crate::llm::create_adapter(AdapterType::OpenRouter, key))
                    as Arc<dyn LlmAdapter>
            });
        }

        if self.policy.is_none() {
            self.policy = Some(config.difficulty_policy()?);
        }

        if self.event_bus.is_none() {
            self.event_bus = Some(Arc::new(EventBus::new()));
        }

        self.config = Some(config);
        Ok(self)
    }

    /// Use test dependencies (mocks)
    ///
    /// Mock config with default values, no LLM. Sources still have to be
    /// injected by the test.
    #[cfg(test)]
    pub fn with_test_deps(mut self) -> Self {
        use crate::services::mocks::test_helpers::*;

        self.config = Some(Arc::new(create_mock_config()) as Arc<dyn ConfigService>);
        self.event_bus = Some(Arc::new(EventBus::new()));
        self.use_llm = false;

        self
    }

    /// Override config service
    pub fn with_config(mut self, config: Arc<dyn ConfigService>) -> Self {
        self.config = Some(config);
        self
    }

    /// Override question parser
    pub fn with_parser(mut self, parser: Arc<dyn QuestionParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Override grade source
    pub fn with_grade_source(mut self, grades: Arc<dyn GradeSource>) -> Self {
        self.grades = Some(grades);
        self
    }

    /// Override opinion source
    pub fn with_opinion_source(mut self, opinions: Arc<dyn OpinionSource>) -> Self {
        self.opinions = Some(opinions);
        self
    }

    /// Override difficulty policy
    pub fn with_policy(mut self, policy: DifficultyPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Override per-source timeout
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = Some(timeout);
        self
    }

    /// Override event bus
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Override LLM adapter
    pub fn with_llm_adapter(mut self, llm: Arc<dyn LlmAdapter>) -> Self {
        self.llm_adapter = Some(llm);
        self.use_llm = true;
        self
    }

    /// Rule-based parsing and plain replies even when a key is configured
    pub fn without_llm(mut self) -> Self {
        self.use_llm = false;
        self.llm_adapter = None;
        self
    }

    /// Build the configured dependencies
    ///
    /// # Errors
    ///
    /// Returns ConfigError if either evidence source is missing, or if the
    /// difficulty policy is invalid.
    pub fn build(self) -> Result<AppDependencies> {
        let grades = self
            .grades
            .ok_or_else(|| AdvisorError::ConfigError("Grade source not configured".to_string()))?;
        let opinions = self
            .opinions
            .ok_or_else(|| AdvisorError::ConfigError("Opinion source not configured".to_string()))?;

        let policy = match (self.policy, &self.config) {
            (Some(policy), _) => policy,
            (None, Some(config)) => config.difficulty_policy()?,
            (None, None) => DifficultyPolicy::default(),
        };
        policy.validate()?;

        let source_timeout = self
            .source_timeout
            .or_else(|| self.config.as_ref().map(|c| c.source_timeout()))
            .unwrap_or(DEFAULT_SOURCE_TIMEOUT);
        let model = self.config.as_ref().map(|c| c.model());
        let llm_adapter = if self.use_llm { self.llm_adapter } else { None };

        let parser: Arc<dyn QuestionParser> = match (self.parser, &llm_adapter) {
            (Some(parser), _) => parser,
            (None, Some(llm)) => {
                let mut parser = LlmQuestionParser::new(llm.clone()).with_timeout(source_timeout);
                if let Some(model) = &model {
                    parser = parser.with_model(model.clone());
                }
                Arc::new(parser)
            }
            (None, None) => Arc::new(RuleQuestionParser::new()),
        };

        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));

        let mut advisor = Advisor::new(
            parser,
            grades,
            opinions,
            EvidenceSynthesizer::new(policy),
            source_timeout,
        )
        .with_event_bus(event_bus.clone());

        if let Some(llm) = &llm_adapter {
            let mut phraser = VerdictPhraser::new(llm.clone()).with_timeout(source_timeout);
            if let Some(model) = model {
                phraser = phraser.with_model(model);
            }
            advisor = advisor.with_phraser(phraser);
        }

        Ok(AppDependencies {
            config: self.config,
            advisor: Arc::new(advisor),
            event_bus,
            llm_adapter,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Container for all application dependencies
///
/// # Thread Safety
///
/// All fields use Arc for shared ownership across threads; the advisor can
/// serve concurrent questions.
pub struct AppDependencies {
    pub config: Option<Arc<dyn ConfigService>>,
    pub advisor: Arc<Advisor>,
    pub event_bus: Arc<EventBus>,
    pub llm_adapter: Option<Arc<dyn LlmAdapter>>,
}
