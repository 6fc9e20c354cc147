// Question parsing: free-form text -> course, instructor and period
//
// The rule parser is the default and is fully deterministic. The LLM parser
// is an optional front for it that copes with looser phrasing; whatever the
// model returns is pushed back through the same course normalization, and
// any model or JSON failure falls back to the rules.

use crate::course::{find_courses, CourseKey, CourseMention};
use crate::error::{AdvisorError, Result};
use crate::evidence::{PeriodFilter, Semester};
use crate::llm::{LlmAdapter, LlmRequest, Message, DEFAULT_LLM_TIMEOUT};
use anyhow::Context;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Capitalised words that end a name run ("with Adams Fall 2022")
const NAME_STOP_WORDS: &[&str] = &[
    "Fall", "Spring", "Summer", "In", "For", "During", "This", "Next", "Last", "Semester",
    "Course", "Class", "And", "Or", "Vs",
];

/// Capitalised words that are never instructors in "<Word>'s"
const NON_NAME_POSSESSIVES: &[&str] = &[
    "What", "That", "It", "There", "Here", "Who", "Where", "How", "Let", "He", "She", "Purdue",
    "Today", "Everyone", "Nobody",
];

const EXTRACTION_PROMPT: &str = r#"You extract course references from student questions
about Purdue courses. Reply with a single JSON object and nothing else:
{"courses": [{"subject": "CS", "course_number": "250", "instructor": "Adams"}],
 "semester": "fall", "year": 2022}
Give one entry per course and instructor combination. Use several entries only when the
student asks to compare options, e.g. "CS 250 with Adams or Turkstra?" has two.
Use null for anything the question does not mention. Copy the course number exactly as
written; do not expand or correct it."#;

/// Most options one comparison question may name
pub const MAX_COMPARED_OPTIONS: usize = 4;

/// One course, optionally narrowed to an instructor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseOption {
    pub course: CourseKey,
    /// Instructor last name, used as a substring filter
    pub instructor: Option<String>,
}

/// Structured form of a user question
///
/// `course` and `instructor` describe the first option named. Comparison
/// questions ("CS 250 with Adams or Turkstra?") list the remaining options in
/// `alternatives`; the period applies to all of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedQuestion {
    pub course: CourseKey,
    /// Instructor last name, used as a substring filter
    pub instructor: Option<String>,
    pub period: Option<PeriodFilter>,
    pub alternatives: Vec<CourseOption>,
}

impl ParsedQuestion {
    /// Question about a single course
    pub fn single(
        course: CourseKey,
        instructor: Option<String>,
        period: Option<PeriodFilter>,
    ) -> Self {
        Self {
            course,
            instructor,
            period,
            alternatives: Vec::new(),
        }
    }

    /// Build from every option found, dropping repeats
    ///
    /// # Errors
    /// - AmbiguousCourse when there is no option, or more than
    ///   `MAX_COMPARED_OPTIONS`
    pub fn from_options(
        options: Vec<CourseOption>,
        period: Option<PeriodFilter>,
    ) -> Result<Self> {
        let mut distinct: Vec<CourseOption> = Vec::new();
        for option in options {
            if !distinct.contains(&option) {
                distinct.push(option);
            }
        }

        if distinct.len() > MAX_COMPARED_OPTIONS {
            return Err(AdvisorError::AmbiguousCourse(format!(
                "{} options to compare, at most {} fit in one question",
                distinct.len(),
                MAX_COMPARED_OPTIONS
            )));
        }

        let mut rest = distinct.into_iter();
        let first = rest.next().ok_or_else(|| {
            AdvisorError::AmbiguousCourse("no subject and course number found".to_string())
        })?;

        Ok(Self {
            course: first.course,
            instructor: first.instructor,
            period,
            alternatives: rest.collect(),
        })
    }

    pub fn is_comparison(&self) -> bool {
        !self.alternatives.is_empty()
    }

    /// Every option, first one included
    pub fn options(&self) -> Vec<CourseOption> {
        let mut options = vec![CourseOption {
            course: self.course.clone(),
            instructor: self.instructor.clone(),
        }];
        options.extend(self.alternatives.iter().cloned());
        options
    }
}

/// Turns a question into a `ParsedQuestion`
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuestionParser: Send + Sync {
    /// # Errors
    /// - AmbiguousCourse when no usable course reference is present
    async fn parse(&self, question: &str) -> Result<ParsedQuestion>;
}

const NAME_RUN: &str = r"([A-Z][A-Za-z'\-]+(?:\s+[A-Z][A-Za-z'\-]+)*)";

fn instructor_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"(?:\b(?i:with|by|professor|prof\.?|dr\.?|instructor)\s+)+{}",
            NAME_RUN
        ))
        .expect("instructor pattern is valid")
    })
}

/// "... or Turkstra", "..., and Dr. Lee" right after a name
fn alternative_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"^,?\s+(?i:or|and|vs\.?|versus)\s+(?:(?i:professor|prof\.?|dr\.?)\s+)?{}",
            NAME_RUN
        ))
        .expect("alternative name pattern is valid")
    })
}

fn possessive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b([A-Z][a-z][A-Za-z\-]*)['’]s\b").expect("possessive pattern is valid")
    })
}

fn semester_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(fall|spring|summer)\b").expect("semester pattern is valid")
    })
}

fn year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(20\d{2})\b").expect("year pattern is valid"))
}

/// Deterministic regex-based parser
#[derive(Debug, Clone, Default)]
pub struct RuleQuestionParser;

impl RuleQuestionParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_text(&self, question: &str) -> Result<ParsedQuestion> {
        let courses = find_courses(question)?;
        let names = extract_instructors(question);
        ParsedQuestion::from_options(pair_options(&courses, &names), extract_period(question))
    }
}

#[async_trait]
impl QuestionParser for RuleQuestionParser {
    async fn parse(&self, question: &str) -> Result<ParsedQuestion> {
        self.parse_text(question)
    }
}

/// Attach each instructor to the closest course mentioned before it
///
/// Names ahead of the first course ("Adams's CS 250") belong to that course.
/// A course with several instructors yields one option per instructor.
fn pair_options(courses: &[CourseMention], names: &[(usize, String)]) -> Vec<CourseOption> {
    let mut options = Vec::new();

    for (i, mention) in courses.iter().enumerate() {
        let from = if i == 0 { 0 } else { mention.offset };
        let until = courses.get(i + 1).map_or(usize::MAX, |next| next.offset);
        let own: Vec<&String> = names
            .iter()
            .filter(|(offset, _)| (from..until).contains(offset))
            .map(|(_, name)| name)
            .collect();

        if own.is_empty() {
            options.push(CourseOption {
                course: mention.course.clone(),
                instructor: None,
            });
        }
        for name in own {
            options.push(CourseOption {
                course: mention.course.clone(),
                instructor: Some(name.clone()),
            });
        }
    }

    options
}

fn is_subject_code(word: &str) -> bool {
    (2..=5).contains(&word.len()) && word.chars().all(|c| c.is_ascii_uppercase())
}

/// Last usable name in a run of capitalised words ("Jane Smith Spring")
fn name_from_run(run: &str) -> Option<String> {
    let words: Vec<&str> = run
        .split_whitespace()
        .take_while(|w| !NAME_STOP_WORDS.contains(w) && !is_subject_code(w))
        .collect();
    words.last().and_then(|w| clean_name(w))
}

/// Instructor last names with their offsets, in order of appearance
///
/// Names follow "with/by/professor/dr", possibly chained with "or"/"and"
/// ("with Adams or Turkstra"). Without any of those, a possessive
/// "<Name>'s" is used instead.
pub fn extract_instructors(question: &str) -> Vec<(usize, String)> {
    let mut names: Vec<(usize, String)> = Vec::new();

    for caps in instructor_pattern().captures_iter(question) {
        let Some(run) = caps.get(1) else {
            continue;
        };
        let Some(name) = name_from_run(run.as_str()) else {
            continue;
        };
        names.push((run.start(), name));

        let mut cursor = run.end();
        while let Some(alt) = alternative_name_pattern()
            .captures(&question[cursor..])
            .and_then(|c| c.get(1))
        {
            let Some(name) = name_from_run(alt.as_str()) else {
                break;
            };
            names.push((cursor + alt.start(), name));
            cursor += alt.end();
        }
    }

    if names.is_empty() {
        if let Some(caps) = possessive_pattern()
            .captures_iter(question)
            .find(|caps| !NON_NAME_POSSESSIVES.contains(&&caps[1]))
        {
            if let Some(name) = caps.get(1) {
                names.push((name.start(), name.as_str().to_string()));
            }
        }
    }

    let mut seen: Vec<String> = Vec::new();
    names.retain(|(_, name)| {
        if seen.contains(name) {
            false
        } else {
            seen.push(name.clone());
            true
        }
    });
    names
}

/// Semester word and/or 20xx year, if mentioned
pub fn extract_period(question: &str) -> Option<PeriodFilter> {
    let semester = semester_pattern()
        .captures(question)
        .and_then(|caps| Semester::parse(&caps[1]));
    let year = year_pattern()
        .captures(question)
        .and_then(|caps| caps[1].parse::<u16>().ok());

    PeriodFilter::new(semester, year)
}

fn clean_name(raw: &str) -> Option<String> {
    let name = raw.trim_matches(|c: char| c == '\'' || c == '-');
    if name.len() < 2 {
        None
    } else {
        Some(name.to_string())
    }
}

/// Last word of a full name ("George B. Adams" -> "Adams")
fn last_name(full: &str) -> Option<String> {
    full.split_whitespace().last().and_then(clean_name)
}

/// One course entry in the model's JSON reply
#[derive(Debug, Default, Deserialize)]
struct ExtractedCourse {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    course_number: Option<serde_json::Value>,
    #[serde(default)]
    instructor: Option<String>,
}

/// Shape of the model's JSON reply
///
/// Models sometimes answer with a flat single-course object instead of the
/// `courses` list; both are accepted.
#[derive(Debug, Deserialize)]
struct Extraction {
    #[serde(default)]
    courses: Vec<ExtractedCourse>,
    #[serde(flatten)]
    single: ExtractedCourse,
    #[serde(default)]
    semester: Option<String>,
    #[serde(default)]
    year: Option<serde_json::Value>,
}

/// Model-assisted parser with rule-based fallback
///
/// The model call is bounded by a timeout; expiry counts as a model failure.
pub struct LlmQuestionParser {
    llm: Arc<dyn LlmAdapter>,
    model: Option<String>,
    timeout: Duration,
    fallback: RuleQuestionParser,
}

impl LlmQuestionParser {
    pub fn new(llm: Arc<dyn LlmAdapter>) -> Self {
        Self {
            llm,
            model: None,
            timeout: DEFAULT_LLM_TIMEOUT,
            fallback: RuleQuestionParser::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn ask_model(&self, question: &str) -> anyhow::Result<ParsedQuestion> {
        let mut request = LlmRequest::new(vec![
            Message::system(EXTRACTION_PROMPT),
            Message::user(question),
        ])
        .with_temperature(0.0)
        .with_max_tokens(300);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }

        let response = tokio::time::timeout(self.timeout, self.llm.complete_chat(request))
            .await
            .map_err(|_| {
                anyhow::anyhow!("no model reply within {} ms", self.timeout.as_millis())
            })??;
        let json = extract_json_object(&response.content)
            .context("model reply contains no JSON object")?;
        let extraction: Extraction =
            serde_json::from_str(json).context("model reply is not the expected JSON")?;

        extraction.into_parsed()
    }
}

impl ExtractedCourse {
    fn into_option(self) -> anyhow::Result<CourseOption> {
        let subject = self.subject.context("model found no subject")?;
        let number = self
            .course_number
            .as_ref()
            .and_then(json_digits)
            .context("model found no course number")?;

        Ok(CourseOption {
            course: CourseKey::new(&subject, &number)?,
            instructor: self
                .instructor
                .as_deref()
                .filter(|name| !name.eq_ignore_ascii_case("null"))
                .and_then(last_name),
        })
    }
}

impl Extraction {
    fn into_parsed(self) -> anyhow::Result<ParsedQuestion> {
        let entries = if self.courses.is_empty() {
            vec![self.single]
        } else {
            self.courses
        };
        let options = entries
            .into_iter()
            .map(ExtractedCourse::into_option)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let semester = self.semester.as_deref().and_then(Semester::parse);
        let year = self
            .year
            .as_ref()
            .and_then(json_digits)
            .and_then(|y| y.parse::<u16>().ok())
            .filter(|y| (2000..=2099).contains(y));

        Ok(ParsedQuestion::from_options(
            options,
            PeriodFilter::new(semester, year),
        )?)
    }
}

/// Numbers may come back as JSON numbers or strings
fn json_digits(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Slice from the first '{' to the last '}', tolerating code fences
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[async_trait]
impl QuestionParser for LlmQuestionParser {
    async fn parse(&self, question: &str) -> Result<ParsedQuestion> {
        match self.ask_model(question).await {
            Ok(parsed) => {
                tracing::debug!("Model parsed question as {:?}", parsed);
                Ok(parsed)
            }
            Err(e) => {
                tracing::warn!("Model question parsing failed, using rules: {}", e);
                self.fallback.parse_text(question)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlmAdapter};

    fn reply(content: &str) -> anyhow::Result<LlmResponse> {
        Ok(LlmResponse {
            content: content.to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    fn option(subject: &str, number: &str, instructor: Option<&str>) -> CourseOption {
        CourseOption {
            course: CourseKey::new(subject, number).unwrap(),
            instructor: instructor.map(String::from),
        }
    }

    #[test]
    fn test_rule_parser_course_and_professor() {
        let parsed = RuleQuestionParser::new()
            .parse_text("How hard is CS 250 with Professor Adams?")
            .unwrap();

        assert_eq!(parsed.course, CourseKey::new("CS", "25000").unwrap());
        assert_eq!(parsed.instructor.as_deref(), Some("Adams"));
        assert_eq!(parsed.period, None);
        assert!(!parsed.is_comparison());
    }

    #[test]
    fn test_rule_parser_without_instructor() {
        let parsed = RuleQuestionParser::new().parse_text("is cs25000 tough?").unwrap();
        assert_eq!(parsed.course.to_string(), "CS 25000");
        assert_eq!(parsed.instructor, None);
    }

    #[test]
    fn test_prose_numbers_do_not_hide_the_course() {
        let parsed = RuleQuestionParser::new()
            .parse_text("With over 300 students, is CS 250 hard?")
            .unwrap();
        assert_eq!(parsed.course.to_string(), "CS 25000");
        assert!(!parsed.is_comparison());
    }

    #[test]
    fn test_full_name_keeps_last_name_and_stops_at_semester() {
        let parsed = RuleQuestionParser::new()
            .parse_text("MA 26100 taught by Dr. Jane Smith Spring 2023")
            .unwrap();

        assert_eq!(parsed.instructor.as_deref(), Some("Smith"));
        let period = parsed.period.unwrap();
        assert_eq!(period.semester, Some(Semester::Spring));
        assert_eq!(period.year, Some(2023));
    }

    #[test]
    fn test_possessive_instructor() {
        let parsed = RuleQuestionParser::new()
            .parse_text("What's Adams's CS 250 like in fall?")
            .unwrap();

        assert_eq!(parsed.instructor.as_deref(), Some("Adams"));
        assert_eq!(
            parsed.period,
            PeriodFilter::new(Some(Semester::Fall), None)
        );
    }

    #[test]
    fn test_subject_code_is_not_an_instructor() {
        assert!(extract_instructors("Anyone with CS 250 notes?").is_empty());
    }

    #[test]
    fn test_four_digit_course_is_ambiguous() {
        let err = RuleQuestionParser::new()
            .parse_text("How is CS 2500 with Adams?")
            .unwrap_err();
        assert!(matches!(err, AdvisorError::AmbiguousCourse(_)));
    }

    #[test]
    fn test_instructor_comparison() {
        let parsed = RuleQuestionParser::new()
            .parse_text("Should I take CS 250 with Adams or Turkstra?")
            .unwrap();

        assert!(parsed.is_comparison());
        assert_eq!(
            parsed.options(),
            vec![
                option("CS", "250", Some("Adams")),
                option("CS", "250", Some("Turkstra")),
            ]
        );
    }

    #[test]
    fn test_course_comparison_pairs_names_with_their_course() {
        let parsed = RuleQuestionParser::new()
            .parse_text("Is CS 250 with Adams harder than CS 251 with Dr. Lee in Fall 2023?")
            .unwrap();

        assert_eq!(
            parsed.options(),
            vec![
                option("CS", "250", Some("Adams")),
                option("CS", "251", Some("Lee")),
            ]
        );
        assert_eq!(
            parsed.period,
            PeriodFilter::new(Some(Semester::Fall), Some(2023))
        );

        let parsed = RuleQuestionParser::new()
            .parse_text("Is CS 250 harder than CS 251?")
            .unwrap();
        assert_eq!(
            parsed.options(),
            vec![option("CS", "250", None), option("CS", "251", None)]
        );
    }

    #[test]
    fn test_too_many_options_is_ambiguous() {
        let err = RuleQuestionParser::new()
            .parse_text("Rank CS 180, CS 182, CS 240, CS 250 and CS 251 by difficulty")
            .unwrap_err();
        match err {
            AdvisorError::AmbiguousCourse(msg) => assert!(msg.contains("5 options")),
            other => panic!("Expected AmbiguousCourse, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("```json\n{\"a\": 1}\n```"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[tokio::test]
    async fn test_llm_parser_uses_model_json() {
        let mut llm = MockLlmAdapter::new();
        llm.expect_complete_chat().times(1).returning(|_| {
            reply(
                r#"{"courses": [
                    {"subject": "ma", "course_number": 261, "instructor": "Jane Smith"}
                ], "semester": "Spring", "year": 2023}"#,
            )
        });

        let parser = LlmQuestionParser::new(Arc::new(llm));
        let parsed = parser.parse("calc 3 w/ smith last spring").await.unwrap();

        assert_eq!(parsed.course, CourseKey::new("MA", "26100").unwrap());
        assert_eq!(parsed.instructor.as_deref(), Some("Smith"));
        assert_eq!(
            parsed.period,
            PeriodFilter::new(Some(Semester::Spring), Some(2023))
        );
    }

    #[tokio::test]
    async fn test_llm_parser_accepts_flat_object() {
        let mut llm = MockLlmAdapter::new();
        llm.expect_complete_chat().returning(|_| {
            reply(r#"{"subject": "CS", "course_number": "180", "instructor": null}"#)
        });

        let parser = LlmQuestionParser::new(Arc::new(llm));
        let parsed = parser.parse("is one-eighty ok").await.unwrap();
        assert_eq!(parsed.course.to_string(), "CS 18000");
        assert_eq!(parsed.instructor, None);
    }

    #[tokio::test]
    async fn test_llm_parser_comparison() {
        let mut llm = MockLlmAdapter::new();
        llm.expect_complete_chat().returning(|_| {
            reply(
                r#"{"courses": [
                    {"subject": "CS", "course_number": "250", "instructor": "George Adams"},
                    {"subject": "CS", "course_number": "250", "instructor": "Turkstra"}
                ]}"#,
            )
        });

        let parser = LlmQuestionParser::new(Arc::new(llm));
        let parsed = parser.parse("250: adams or turkstra?").await.unwrap();
        assert_eq!(
            parsed.options(),
            vec![
                option("CS", "250", Some("Adams")),
                option("CS", "250", Some("Turkstra")),
            ]
        );
    }

    #[tokio::test]
    async fn test_llm_parser_falls_back_on_garbage() {
        let mut llm = MockLlmAdapter::new();
        llm.expect_complete_chat()
            .returning(|_| reply("I think you mean CS 250!"));

        let parser = LlmQuestionParser::new(Arc::new(llm));
        let parsed = parser.parse("Is CS 250 with Adams hard?").await.unwrap();

        assert_eq!(parsed.course.to_string(), "CS 25000");
        assert_eq!(parsed.instructor.as_deref(), Some("Adams"));
    }

    #[tokio::test]
    async fn test_llm_parser_falls_back_on_error() {
        let mut llm = MockLlmAdapter::new();
        llm.expect_complete_chat()
            .returning(|_| Err(anyhow::anyhow!("rate limited")));

        let parser = LlmQuestionParser::new(Arc::new(llm));
        let parsed = parser.parse("CS 18000 by Dunsmore").await.unwrap();
        assert_eq!(parsed.course.to_string(), "CS 18000");
    }

    /// Adapter that never answers in time
    struct StalledLlm;

    #[async_trait]
    impl LlmAdapter for StalledLlm {
        async fn complete_chat(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            anyhow::bail!("unreachable")
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_llm_parser_falls_back_when_model_stalls() {
        let parser = LlmQuestionParser::new(Arc::new(StalledLlm))
            .with_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let parsed = parser.parse("CS 250 with Adams").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(parsed.course.to_string(), "CS 25000");
        assert_eq!(parsed.instructor.as_deref(), Some("Adams"));
    }

    #[tokio::test]
    async fn test_llm_parser_rejects_four_digit_guess() {
        let mut llm = MockLlmAdapter::new();
        llm.expect_complete_chat()
            .returning(|_| reply(r#"{"subject": "CS", "course_number": "2500"}"#));

        // Model output fails normalization, rules see the same 4-digit number
        let parser = LlmQuestionParser::new(Arc::new(llm));
        let err = parser.parse("CS 2500?").await.unwrap_err();
        assert!(matches!(err, AdvisorError::AmbiguousCourse(_)));
    }
}
