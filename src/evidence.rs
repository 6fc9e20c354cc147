// Query and result types exchanged with the evidence sources
//
// Everything here is build-once, read-once: queries are derived from the
// parsed question, results are handed to the synthesizer and dropped.

use crate::course::CourseKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of community posts considered per question
pub const MAX_OPINION_SNIPPETS: usize = 5;

/// Semester part of an academic period ("Fall 2022")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Semester {
    Fall,
    Spring,
    Summer,
}

impl Semester {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fall" => Some(Semester::Fall),
            "spring" => Some(Semester::Spring),
            "summer" => Some(Semester::Summer),
            _ => None,
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Semester::Fall => write!(f, "Fall"),
            Semester::Spring => write!(f, "Spring"),
            Semester::Summer => write!(f, "Summer"),
        }
    }
}

/// Optional narrowing of grade rows by academic period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodFilter {
    pub semester: Option<Semester>,
    pub year: Option<u16>,
}

impl PeriodFilter {
    /// Returns None when neither part is set
    pub fn new(semester: Option<Semester>, year: Option<u16>) -> Option<Self> {
        if semester.is_none() && year.is_none() {
            None
        } else {
            Some(Self { semester, year })
        }
    }
}

impl fmt::Display for PeriodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.semester, self.year) {
            (Some(s), Some(y)) => write!(f, "{} {}", s, y),
            (Some(s), None) => write!(f, "{} semesters", s),
            (None, Some(y)) => write!(f, "{}", y),
            (None, None) => Ok(()),
        }
    }
}

/// Aggregate GPA lookup for one course, optionally narrowed by instructor
#[derive(Debug, Clone, PartialEq)]
pub struct GradeQuery {
    pub course: CourseKey,
    /// Case-insensitive substring of the instructor name; empty matches all
    pub instructor_filter: String,
    pub period: Option<PeriodFilter>,
}

impl GradeQuery {
    pub fn new(course: CourseKey, instructor: Option<&str>) -> Self {
        Self {
            course,
            instructor_filter: instructor.unwrap_or_default().trim().to_string(),
            period: None,
        }
    }

    pub fn with_period(mut self, period: Option<PeriodFilter>) -> Self {
        self.period = period;
        self
    }
}

/// Outcome of a grade lookup
///
/// `metric` is None when no rows matched or the store was unavailable;
/// `sample_note` says which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub metric: Option<f64>,
    pub sample_note: String,
    /// Official title, when the store knows the course at all
    pub course_title: Option<String>,
}

impl GradeResult {
    pub fn new(metric: Option<f64>, sample_note: impl Into<String>) -> Self {
        Self {
            metric,
            sample_note: sample_note.into(),
            course_title: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.course_title = title;
        self
    }

    /// Degraded result substituted when the grade store fails
    pub fn unavailable(reason: &str) -> Self {
        Self::new(None, format!("grade data unavailable ({})", reason))
    }
}

/// Free-text community search query
///
/// Derived deterministically: instructor last name + 3-digit shorthand
/// ("Adams 250"), or subject + shorthand ("CS 250") without an instructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpinionQuery {
    pub query_text: String,
}

impl OpinionQuery {
    pub fn derive(course: &CourseKey, instructor: Option<&str>) -> Self {
        let last_name = instructor
            .and_then(|name| name.split_whitespace().last())
            .filter(|name| !name.is_empty());

        let query_text = match last_name {
            Some(name) => format!("{} {}", name, course.shorthand()),
            None => format!("{} {}", course.subject(), course.shorthand()),
        };

        Self { query_text }
    }
}

/// Ranked community post titles, consumed once
///
/// Holds at most `MAX_OPINION_SNIPPETS` titles in the order the search
/// service ranked them. It is an iterator rather than a collection: once
/// drained it cannot be replayed. An empty result means no discussion
/// was found (or the search failed).
#[derive(Debug)]
pub struct OpinionResult {
    snippets: std::vec::IntoIter<String>,
}

impl OpinionResult {
    pub fn new(snippets: Vec<String>) -> Self {
        let mut snippets = snippets;
        snippets.truncate(MAX_OPINION_SNIPPETS);
        Self {
            snippets: snippets.into_iter(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for OpinionResult {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.snippets.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.snippets.size_hint()
    }
}

impl ExactSizeIterator for OpinionResult {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs250() -> CourseKey {
        CourseKey::new("CS", "250").unwrap()
    }

    #[test]
    fn test_opinion_query_uses_last_name_and_shorthand() {
        let query = OpinionQuery::derive(&cs250(), Some("George Adams"));
        assert_eq!(query.query_text, "Adams 250");
    }

    #[test]
    fn test_opinion_query_without_instructor() {
        let query = OpinionQuery::derive(&cs250(), None);
        assert_eq!(query.query_text, "CS 250");
    }

    #[test]
    fn test_opinion_result_caps_at_five() {
        let titles: Vec<String> = (0..8).map(|i| format!("post {}", i)).collect();
        let result = OpinionResult::new(titles);
        assert_eq!(result.len(), MAX_OPINION_SNIPPETS);

        let collected: Vec<String> = result.collect();
        assert_eq!(collected.first().map(String::as_str), Some("post 0"));
        assert_eq!(collected.last().map(String::as_str), Some("post 4"));
    }

    #[test]
    fn test_opinion_result_is_drained_once() {
        let mut result = OpinionResult::new(vec!["only".to_string()]);
        assert_eq!(result.next().as_deref(), Some("only"));
        assert_eq!(result.next(), None);
        assert_eq!(result.next(), None);
    }

    #[test]
    fn test_grade_query_trims_instructor() {
        let query = GradeQuery::new(cs250(), Some("  Adams "));
        assert_eq!(query.instructor_filter, "Adams");

        let query = GradeQuery::new(cs250(), None);
        assert_eq!(query.instructor_filter, "");
    }

    #[test]
    fn test_period_filter_requires_a_part() {
        assert!(PeriodFilter::new(None, None).is_none());
        let period = PeriodFilter::new(Some(Semester::Fall), Some(2022)).unwrap();
        assert_eq!(period.to_string(), "Fall 2022");
    }
}
