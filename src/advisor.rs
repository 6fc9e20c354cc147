// Orchestration: one question in, one verdict out
//
// State machine:
//   START -> NORMALIZING -> QUERYING_GRADES -> QUERYING_OPINIONS
//         -> SYNTHESIZING -> DONE
//   any state -> FAILED
//
// Each source is called exactly once per course option. The two lookups have
// no data dependency, so both are launched together and joined before
// synthesis; each runs under its own timeout, and so does question parsing.
// Source failures of any kind degrade the evidence and never end the request.
// Only a course that cannot be parsed, or a malformed result reaching the
// synthesizer, ends in FAILED.
//
// A comparison question ("CS 250 with Adams or Turkstra?") forks after
// NORMALIZING: every option runs its own QUERYING..DONE leg concurrently.

use crate::chat::{render_comparison, render_reply, ChatReply, ChatRequest, EMPTY_MESSAGE_REPLY};
use crate::course::CourseKey;
use crate::error::{AdvisorError, Result, SourceKind};
use crate::events::{Event, EventBus, EventKind};
use crate::evidence::{GradeQuery, GradeResult, OpinionQuery, OpinionResult, PeriodFilter};
use crate::intent::{CourseOption, ParsedQuestion, QuestionParser, RuleQuestionParser};
use crate::phrasing::VerdictPhraser;
use crate::services::traits::{GradeSource, OpinionSource};
use crate::synthesizer::{EvidenceSynthesizer, Verdict};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Orchestrator states, in the order a successful request visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvisorState {
    Start,
    Normalizing,
    QueryingGrades,
    QueryingOpinions,
    Synthesizing,
    Done,
    Failed,
}

impl AdvisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AdvisorState::Done | AdvisorState::Failed)
    }
}

impl fmt::Display for AdvisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdvisorState::Start => "START",
            AdvisorState::Normalizing => "NORMALIZING",
            AdvisorState::QueryingGrades => "QUERYING_GRADES",
            AdvisorState::QueryingOpinions => "QUERYING_OPINIONS",
            AdvisorState::Synthesizing => "SYNTHESIZING",
            AdvisorState::Done => "DONE",
            AdvisorState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Everything a finished request produced
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub question: String,
    pub course: CourseKey,
    pub instructor: Option<String>,
    pub period: Option<PeriodFilter>,
    pub course_title: Option<String>,
    pub verdict: Verdict,
    /// Every state visited, START through DONE
    pub trace: Vec<AdvisorState>,
    /// Why the grade source was substituted, if it was
    pub grade_error: Option<String>,
    /// Why the opinion source was substituted, if it was
    pub opinion_error: Option<String>,
}

/// Terminal result of `Advisor::run`
#[derive(Debug)]
pub enum Outcome {
    Done(Assessment),
    /// Comparison question: one assessment per option, in the order named
    Compared(Vec<Assessment>),
    Failed {
        state_trace: Vec<AdvisorState>,
        error: AdvisorError,
    },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_) | Outcome::Compared(_))
    }

    /// The assessment of a single-course question
    pub fn assessment(&self) -> Option<&Assessment> {
        match self {
            Outcome::Done(assessment) => Some(assessment),
            Outcome::Compared(_) | Outcome::Failed { .. } => None,
        }
    }

    /// Every assessment produced, one per course option
    pub fn assessments(&self) -> &[Assessment] {
        match self {
            Outcome::Done(assessment) => std::slice::from_ref(assessment),
            Outcome::Compared(assessments) => assessments,
            Outcome::Failed { .. } => &[],
        }
    }

    /// States visited; for comparisons, those of the first option
    pub fn trace(&self) -> &[AdvisorState] {
        match self {
            Outcome::Done(assessment) => &assessment.trace,
            Outcome::Compared(assessments) => {
                assessments.first().map_or(&[], |a| a.trace.as_slice())
            }
            Outcome::Failed { state_trace, .. } => state_trace,
        }
    }
}

/// Per-request state trace that mirrors transitions onto the event bus
struct RequestTrace {
    request_id: u64,
    states: Vec<AdvisorState>,
    event_bus: Option<Arc<EventBus>>,
}

impl RequestTrace {
    fn new(request_id: u64, event_bus: Option<Arc<EventBus>>) -> Self {
        Self {
            request_id,
            states: vec![AdvisorState::Start],
            event_bus,
        }
    }

    fn current(&self) -> AdvisorState {
        self.states.last().copied().unwrap_or(AdvisorState::Start)
    }

    fn enter(&mut self, to: AdvisorState) {
        let from = self.current();
        debug_assert!(!from.is_terminal(), "no transitions out of {}", from);
        tracing::debug!("[request {}] {} -> {}", self.request_id, from, to);
        self.states.push(to);
        self.publish(EventKind::StateChanged { from, to });
    }

    /// Same request, same history, separate future
    fn fork(&self) -> Self {
        Self {
            request_id: self.request_id,
            states: self.states.clone(),
            event_bus: self.event_bus.clone(),
        }
    }

    fn source_failed(&self, source: SourceKind, error: &AdvisorError) {
        let soft = error.is_soft();
        if soft {
            tracing::warn!("[request {}] {} (continuing without it)", self.request_id, error);
        } else {
            tracing::error!(
                "[request {}] unexpected {} source error: {} (continuing without it)",
                self.request_id,
                source,
                error
            );
        }
        self.publish(EventKind::SourceFailed {
            source,
            reason: error.to_string(),
            soft,
        });
    }

    fn fail(mut self, error: AdvisorError) -> Outcome {
        tracing::warn!(
            "[request {}] failed in {}: {}",
            self.request_id,
            self.current(),
            error
        );
        self.enter(AdvisorState::Failed);
        self.publish(EventKind::Failed {
            reason: error.to_string(),
        });
        Outcome::Failed {
            state_trace: self.states,
            error,
        }
    }

    fn publish(&self, kind: EventKind) {
        if let Some(bus) = &self.event_bus {
            // No subscribers is fine
            let _ = bus.publish(Event::new(self.request_id, kind));
        }
    }
}

/// Run a source call under a timeout, reporting expiry as unavailable
async fn bounded<T>(
    limit: Duration,
    kind: SourceKind,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AdvisorError::unavailable(
            kind,
            format!("no response within {} ms", limit.as_millis()),
        )),
    }
}

/// Course difficulty advisor
///
/// Stateless across requests apart from a request counter; safe to share
/// behind an `Arc` and call concurrently.
pub struct Advisor {
    parser: Arc<dyn QuestionParser>,
    rules: RuleQuestionParser,
    grades: Arc<dyn GradeSource>,
    opinions: Arc<dyn OpinionSource>,
    synthesizer: EvidenceSynthesizer,
    phraser: Option<VerdictPhraser>,
    source_timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
    next_request: AtomicU64,
}

impl Advisor {
    pub fn new(
        parser: Arc<dyn QuestionParser>,
        grades: Arc<dyn GradeSource>,
        opinions: Arc<dyn OpinionSource>,
        synthesizer: EvidenceSynthesizer,
        source_timeout: Duration,
    ) -> Self {
        Self {
            parser,
            rules: RuleQuestionParser::new(),
            grades,
            opinions,
            synthesizer,
            phraser: None,
            source_timeout,
            event_bus: None,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn with_phraser(mut self, phraser: VerdictPhraser) -> Self {
        self.phraser = Some(phraser);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    /// Drive one question through the state machine
    pub async fn run(&self, question: &str) -> Outcome {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let mut trace = RequestTrace::new(request_id, self.event_bus.clone());

        trace.enter(AdvisorState::Normalizing);
        let parsed = match self.parse(question).await {
            Ok(parsed) => parsed,
            Err(e) => return trace.fail(e),
        };

        if !parsed.is_comparison() {
            let option = CourseOption {
                course: parsed.course,
                instructor: parsed.instructor,
            };
            return self.assess(trace, question, option, parsed.period).await;
        }

        let options = parsed.options();
        tracing::debug!(
            "[request {}] comparing {} options",
            request_id,
            options.len()
        );
        let legs = options
            .into_iter()
            .map(|option| self.assess(trace.fork(), question, option, parsed.period));

        let mut assessments = Vec::new();
        for outcome in join_all(legs).await {
            match outcome {
                Outcome::Done(assessment) => assessments.push(assessment),
                Outcome::Compared(more) => assessments.extend(more),
                failed @ Outcome::Failed { .. } => return failed,
            }
        }
        Outcome::Compared(assessments)
    }

    /// Parse under the source timeout; a stalled parser yields to the rules
    async fn parse(&self, question: &str) -> Result<ParsedQuestion> {
        match tokio::time::timeout(self.source_timeout, self.parser.parse(question)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Question parser gave no answer within {} ms, using rules",
                    self.source_timeout.as_millis()
                );
                self.rules.parse_text(question)
            }
        }
    }

    /// QUERYING_GRADES through DONE for one course option
    async fn assess(
        &self,
        mut trace: RequestTrace,
        question: &str,
        option: CourseOption,
        period: Option<PeriodFilter>,
    ) -> Outcome {
        let instructor = option.instructor.as_deref();
        let grade_query = GradeQuery::new(option.course.clone(), instructor).with_period(period);
        let opinion_query = OpinionQuery::derive(&option.course, instructor);

        trace.enter(AdvisorState::QueryingGrades);
        trace.enter(AdvisorState::QueryingOpinions);
        let (grade_outcome, opinion_outcome) = tokio::join!(
            bounded(
                self.source_timeout,
                SourceKind::Grades,
                self.grades.average_gpa(&grade_query)
            ),
            bounded(
                self.source_timeout,
                SourceKind::Opinions,
                self.opinions.search(&opinion_query)
            ),
        );

        let (grade_result, grade_error) = match grade_outcome {
            Ok(result) => (result, None),
            Err(e) => {
                trace.source_failed(SourceKind::Grades, &e);
                let reason = e.to_string();
                (GradeResult::unavailable(&reason), Some(reason))
            }
        };
        let (opinion_result, opinion_error) = match opinion_outcome {
            Ok(result) => (result, None),
            Err(e) => {
                trace.source_failed(SourceKind::Opinions, &e);
                (OpinionResult::empty(), Some(e.to_string()))
            }
        };

        trace.enter(AdvisorState::Synthesizing);
        let course_title = grade_result.course_title.clone();
        let verdict = match self.synthesizer.synthesize(&grade_result, opinion_result) {
            Ok(verdict) => verdict,
            Err(e) => return trace.fail(e),
        };

        trace.enter(AdvisorState::Done);
        trace.publish(EventKind::VerdictReady {
            band: verdict.difficulty_band,
        });
        tracing::info!(
            "[request {}] {} rated {} (metric {:?}, {} posts)",
            trace.request_id,
            option.course,
            verdict.difficulty_band,
            verdict.grade_metric,
            verdict.opinion_snippets.len()
        );

        Outcome::Done(Assessment {
            question: question.to_string(),
            course: option.course,
            instructor: option.instructor,
            period,
            course_title,
            verdict,
            trace: trace.states,
            grade_error,
            opinion_error,
        })
    }

    /// Answer a question as reply text
    ///
    /// Failures come back as a clarification request rather than an error.
    pub async fn advise(&self, question: &str) -> String {
        match self.run(question).await {
            Outcome::Done(assessment) => self.reply_for(&assessment).await,
            Outcome::Compared(assessments) => {
                let bodies = join_all(assessments.iter().map(|a| self.reply_for(a))).await;
                render_comparison(&assessments, &bodies)
            }
            Outcome::Failed { error, .. } => error.clarification(),
        }
    }

    async fn reply_for(&self, assessment: &Assessment) -> String {
        match &self.phraser {
            Some(phraser) => phraser.phrase(assessment).await,
            None => render_reply(assessment),
        }
    }

    /// One chat request, one reply; session ids are not tracked
    pub async fn chat(&self, request: ChatRequest) -> ChatReply {
        let message = request.message.trim();
        if message.is_empty() {
            return ChatReply {
                reply: EMPTY_MESSAGE_REPLY.to_string(),
            };
        }

        tracing::debug!("Chat message for session {}", request.session_id);
        ChatReply {
            reply: self.advise(message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{MockQuestionParser, ParsedQuestion, RuleQuestionParser};
    use crate::services::traits::{MockGradeSource, MockOpinionSource};
    use crate::synthesizer::{DifficultyBand, DifficultyPolicy};

    fn advisor(grades: MockGradeSource, opinions: MockOpinionSource) -> Advisor {
        Advisor::new(
            Arc::new(RuleQuestionParser::new()),
            Arc::new(grades),
            Arc::new(opinions),
            EvidenceSynthesizer::new(DifficultyPolicy::default()),
            Duration::from_millis(500),
        )
    }

    fn grades_returning(metric: Option<f64>) -> MockGradeSource {
        let mut grades = MockGradeSource::new();
        grades
            .expect_average_gpa()
            .times(1)
            .returning(move |_| Ok(GradeResult::new(metric, "test rows")));
        grades
    }

    fn opinions_returning(titles: Vec<&'static str>) -> MockOpinionSource {
        let mut opinions = MockOpinionSource::new();
        opinions.expect_search().times(1).returning(move |_| {
            Ok(OpinionResult::new(titles.iter().map(|t| t.to_string()).collect()))
        });
        opinions
    }

    const FULL_TRACE: [AdvisorState; 6] = [
        AdvisorState::Start,
        AdvisorState::Normalizing,
        AdvisorState::QueryingGrades,
        AdvisorState::QueryingOpinions,
        AdvisorState::Synthesizing,
        AdvisorState::Done,
    ];

    #[tokio::test]
    async fn test_happy_path_visits_every_state() {
        let advisor = advisor(
            grades_returning(Some(2.5)),
            opinions_returning(vec!["impossible exams"]),
        );

        let outcome = advisor.run("How hard is CS 250 with Adams?").await;
        let assessment = outcome.assessment().unwrap();

        assert_eq!(assessment.trace, FULL_TRACE.to_vec());
        assert_eq!(assessment.verdict.difficulty_band, DifficultyBand::VeryHard);
        assert_eq!(assessment.instructor.as_deref(), Some("Adams"));
        assert_eq!(assessment.grade_error, None);
        assert_eq!(assessment.opinion_error, None);
    }

    #[tokio::test]
    async fn test_queries_are_derived_from_question() {
        let mut grades = MockGradeSource::new();
        grades
            .expect_average_gpa()
            .withf(|q| q.course.course_number() == 25000 && q.instructor_filter == "Adams")
            .times(1)
            .returning(|_| Ok(GradeResult::new(Some(3.2), "rows")));

        let mut opinions = MockOpinionSource::new();
        opinions
            .expect_search()
            .withf(|q| q.query_text == "Adams 250")
            .times(1)
            .returning(|_| Ok(OpinionResult::empty()));

        let outcome = advisor(grades, opinions).run("CS 250 with Prof Adams").await;
        assert!(outcome.is_done());
    }

    #[tokio::test]
    async fn test_ambiguous_course_fails_without_calling_sources() {
        let mut grades = MockGradeSource::new();
        grades.expect_average_gpa().never();
        let mut opinions = MockOpinionSource::new();
        opinions.expect_search().never();

        let advisor = advisor(grades, opinions);
        match advisor.run("Is CS 2500 hard?").await {
            Outcome::Failed { state_trace, error } => {
                assert_eq!(
                    state_trace,
                    vec![AdvisorState::Start, AdvisorState::Normalizing, AdvisorState::Failed]
                );
                assert!(matches!(error, AdvisorError::AmbiguousCourse(_)));
            }
            Outcome::Done(_) | Outcome::Compared(_) => panic!("Expected FAILED"),
        }
    }

    #[tokio::test]
    async fn test_grade_failure_degrades_to_opinions() {
        let mut grades = MockGradeSource::new();
        grades
            .expect_average_gpa()
            .returning(|_| Err(AdvisorError::unavailable(SourceKind::Grades, "database locked")));

        let advisor = advisor(grades, opinions_returning(vec!["So hard", "Really difficult"]));
        let outcome = advisor.run("CS 250?").await;
        let assessment = outcome.assessment().unwrap();

        assert_eq!(assessment.verdict.grade_metric, None);
        assert_eq!(assessment.verdict.difficulty_band, DifficultyBand::Moderate);
        assert!(assessment.grade_error.as_deref().unwrap().contains("database locked"));
        assert_eq!(assessment.trace.last(), Some(&AdvisorState::Done));
    }

    #[tokio::test]
    async fn test_hard_error_from_source_is_also_absorbed() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();

        let mut opinions = MockOpinionSource::new();
        opinions
            .expect_search()
            .returning(|_| Err(AdvisorError::ConfigError("bad subreddit".to_string())));

        let advisor = advisor(grades_returning(Some(3.1)), opinions).with_event_bus(bus);
        let outcome = advisor.run("CS 250?").await;

        let assessment = outcome.assessment().unwrap();
        assert_eq!(assessment.verdict.difficulty_band, DifficultyBand::Easy);
        assert!(assessment.opinion_error.is_some());

        // Reported as unexpected rather than as a routine outage
        let mut reported = None;
        while let Ok(event) = rx.try_recv() {
            if let EventKind::SourceFailed { source, soft, .. } = event.kind {
                reported = Some((source, soft));
            }
        }
        assert_eq!(reported, Some((SourceKind::Opinions, false)));
    }

    /// Parser that never answers
    struct StalledParser;

    #[async_trait::async_trait]
    impl QuestionParser for StalledParser {
        async fn parse(&self, _question: &str) -> Result<ParsedQuestion> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(AdvisorError::LlmError("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stalled_parser_falls_back_to_rules() {
        let advisor = Advisor::new(
            Arc::new(StalledParser),
            Arc::new(grades_returning(Some(2.5))),
            Arc::new(opinions_returning(vec![])),
            EvidenceSynthesizer::default(),
            Duration::from_millis(100),
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            advisor.run("CS 250 with Adams"),
        )
        .await
        .expect("parsing must not block the request");

        let assessment = outcome.assessment().unwrap();
        assert_eq!(assessment.course.to_string(), "CS 25000");
        assert_eq!(assessment.instructor.as_deref(), Some("Adams"));
        assert_eq!(assessment.trace, FULL_TRACE.to_vec());
    }

    #[tokio::test]
    async fn test_comparison_runs_one_leg_per_option() {
        let mut grades = MockGradeSource::new();
        grades.expect_average_gpa().times(2).returning(|q| {
            let metric = if q.instructor_filter == "Adams" { 2.5 } else { 3.3 };
            Ok(GradeResult::new(Some(metric), "rows"))
        });
        let mut opinions = MockOpinionSource::new();
        opinions
            .expect_search()
            .times(2)
            .returning(|_| Ok(OpinionResult::empty()));

        let outcome = advisor(grades, opinions)
            .run("CS 250 with Adams or Turkstra?")
            .await;

        assert!(outcome.is_done());
        assert!(outcome.assessment().is_none());
        let assessments = outcome.assessments();
        assert_eq!(assessments.len(), 2);
        assert_eq!(assessments[0].instructor.as_deref(), Some("Adams"));
        assert_eq!(assessments[0].verdict.difficulty_band, DifficultyBand::Hard);
        assert_eq!(assessments[1].instructor.as_deref(), Some("Turkstra"));
        assert_eq!(assessments[1].verdict.difficulty_band, DifficultyBand::Easy);
        for assessment in assessments {
            assert_eq!(assessment.trace, FULL_TRACE.to_vec());
        }
    }

    #[tokio::test]
    async fn test_comparison_reply_covers_every_option() {
        let mut grades = MockGradeSource::new();
        grades.expect_average_gpa().returning(|q| {
            let metric = if q.course.course_number() == 25000 { 2.6 } else { 2.9 };
            Ok(GradeResult::new(Some(metric), "rows"))
        });
        let mut opinions = MockOpinionSource::new();
        opinions
            .expect_search()
            .returning(|_| Ok(OpinionResult::empty()));

        let reply = advisor(grades, opinions)
            .advise("Is CS 250 harder than CS 251?")
            .await;

        assert!(reply.starts_with("Comparing 2 options"));
        assert!(reply.contains("CS 25000: HARD"));
        assert!(reply.contains("CS 25100: MODERATE"));
        assert!(reply.contains("Easiest on this evidence: CS 25100 (MODERATE)"));
    }

    #[tokio::test]
    async fn test_bad_metric_fails_only_this_request() {
        let advisor = advisor(grades_returning(Some(f64::NAN)), opinions_returning(vec![]));

        let outcome = advisor.run("CS 250?").await;
        assert!(!outcome.is_done());
        assert_eq!(outcome.trace().last(), Some(&AdvisorState::Failed));
        assert!(outcome.trace().contains(&AdvisorState::Synthesizing));
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();

        let mut parser = MockQuestionParser::new();
        parser.expect_parse().returning(|_| {
            Ok(ParsedQuestion::single(
                CourseKey::new("CS", "250").unwrap(),
                None,
                None,
            ))
        });
        let mut opinions = MockOpinionSource::new();
        opinions
            .expect_search()
            .returning(|_| Err(AdvisorError::unavailable(SourceKind::Opinions, "401")));

        let advisor = Advisor::new(
            Arc::new(parser),
            Arc::new(grades_returning(Some(2.9))),
            Arc::new(opinions),
            EvidenceSynthesizer::default(),
            Duration::from_millis(500),
        )
        .with_event_bus(bus.clone());

        assert!(advisor.run("anything").await.is_done());

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }

        assert!(kinds.contains(&EventKind::SourceFailed {
            source: SourceKind::Opinions,
            reason: "opinion search source unavailable: 401".to_string(),
            soft: true,
        }));
        assert_eq!(
            kinds.last(),
            Some(&EventKind::VerdictReady {
                band: DifficultyBand::Moderate
            })
        );
        let transitions = kinds
            .iter()
            .filter(|k| matches!(k, EventKind::StateChanged { .. }))
            .count();
        assert_eq!(transitions, 5);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let mut grades = MockGradeSource::new();
        grades.expect_average_gpa().never();
        let mut opinions = MockOpinionSource::new();
        opinions.expect_search().never();

        let reply = advisor(grades, opinions).chat(ChatRequest::new("   ")).await;
        assert_eq!(reply.reply, "No message provided");
    }

    #[tokio::test]
    async fn test_advise_returns_clarification_on_failure() {
        let mut grades = MockGradeSource::new();
        grades.expect_average_gpa().never();
        let mut opinions = MockOpinionSource::new();
        opinions.expect_search().never();

        let reply = advisor(grades, opinions).advise("how hard is the class").await;
        assert!(reply.contains("couldn't tell which course"));
    }
}
