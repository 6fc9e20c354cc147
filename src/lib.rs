// Library interface for the course advisor
// This exposes the advisory core as a library that can be:
// - Used programmatically from Rust code
// - Driven by the course-advisor binary
// - Exercised from integration tests with stub sources

pub mod advisor;
pub mod app_builder;
pub mod chat;
pub mod course;
pub mod error;
pub mod events;
pub mod evidence;
pub mod ingest;
pub mod intent;
pub mod llm;
pub mod phrasing;
pub mod services;
pub mod synthesizer;
pub mod version;

// Re-export commonly used types for convenience
pub use advisor::{Advisor, AdvisorState, Assessment, Outcome};
pub use app_builder::{AppBuilder, AppDependencies};
pub use chat::{render_comparison, render_reply, ChatReply, ChatRequest};
pub use course::{find_courses, normalize_course_number, CourseKey, CourseMention};
pub use error::{AdvisorError, Result, SourceKind};
pub use events::{Event, EventBus, EventKind};
pub use evidence::{GradeQuery, GradeResult, OpinionQuery, OpinionResult, PeriodFilter, Semester};
pub use ingest::{ingest_file, IngestReport};
pub use intent::{
    CourseOption, LlmQuestionParser, ParsedQuestion, QuestionParser, RuleQuestionParser,
};
pub use llm::{LlmAdapter, LlmRequest, LlmResponse, Message as LlmMessage};
pub use phrasing::VerdictPhraser;
pub use synthesizer::{DifficultyBand, DifficultyPolicy, EvidenceSynthesizer, Verdict};

pub use services::{
    ConfigService, EnvConfigService, GradeSource, OpinionSource, RedditCredentials,
    RedditOpinionSource, SqliteGradeSource,
};
