// Course identifier normalization
//
// Students write courses as "CS 250", "cs250" or "CS 25000". The grade store
// only knows the official 5-digit number, so every reference is turned into
// a canonical `CourseKey` before any source is queried.

use crate::error::{AdvisorError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Words that look like a subject code in "<word> <number>" but never are
const NON_SUBJECT_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "about", "by", "class", "course", "did", "do", "during",
    "fall", "for", "from", "gpa", "has", "in", "is", "it", "my", "of", "on", "or", "since",
    "spring", "summer", "take", "than", "the", "to", "vs", "was", "with", "year",
];

fn course_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b([a-z]{2,5})\s*(\d+)\b").expect("course pattern is valid")
    })
}

/// Canonical course identity: upper-case subject plus 5-digit number
///
/// Immutable once constructed; the only constructors run the normalization
/// rules, so a `CourseKey` always carries a 5-digit number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseKey {
    subject: String,
    course_number: u32,
}

impl CourseKey {
    /// Build a key from an explicit subject and number string
    ///
    /// # Errors
    /// - `AmbiguousCourse` if the subject is not 2-5 letters
    /// - `AmbiguousCourse` if the number is not 3 (shorthand) or 5 digits
    pub fn new(subject: &str, number: &str) -> Result<Self> {
        let subject = subject.trim();
        if subject.len() < 2
            || subject.len() > 5
            || !subject.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(AdvisorError::AmbiguousCourse(format!(
                "'{}' is not a subject code",
                subject
            )));
        }

        Ok(Self {
            subject: subject.to_ascii_uppercase(),
            course_number: normalize_course_number(number.trim())?,
        })
    }

    /// Find the course a free-form question refers to
    ///
    /// The first course `find_courses` reports.
    ///
    /// # Errors
    /// - `AmbiguousCourse` when no usable reference is present
    pub fn from_text(text: &str) -> Result<Self> {
        let mut found = find_courses(text)?;
        Ok(found.remove(0).course)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn course_number(&self) -> u32 {
        self.course_number
    }

    /// The informal 3-digit form students use ("250" for 25000)
    pub fn shorthand(&self) -> u32 {
        self.course_number / 100
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.subject, self.course_number)
    }
}

/// A course reference and where it starts in the text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseMention {
    pub course: CourseKey,
    pub offset: usize,
}

/// One "<word> <number>" pair that might be a course
struct Candidate<'t> {
    subject: &'t str,
    number: &'t str,
    offset: usize,
    /// Upper-case subject ("CS 250") or subject joined to the number ("cs250")
    explicit: bool,
}

/// Every distinct course a question names, in order of appearance
///
/// A pair only counts as a course when it is written like one: an upper-case
/// subject code ("CS 250") or subject and number run together ("cs250").
/// A lower-case spaced pair ("cs 250") is accepted only when it is the single
/// candidate in the text, so phrases like "over 300 students" are never taken
/// for a course. Explicit pairs with a 4-digit number are never guessed at.
///
/// # Errors
/// - `AmbiguousCourse` when no pair is present, only invalid ones are, an
///   explicit pair has a 4-digit number, or several lower-case pairs compete
pub fn find_courses(text: &str) -> Result<Vec<CourseMention>> {
    let candidates: Vec<Candidate<'_>> = course_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let subject = caps.get(1)?;
            let number = caps.get(2)?;
            if NON_SUBJECT_WORDS.contains(&subject.as_str().to_ascii_lowercase().as_str()) {
                return None;
            }
            Some(Candidate {
                subject: subject.as_str(),
                number: number.as_str(),
                offset: whole.start(),
                explicit: subject.end() == number.start()
                    || subject.as_str().chars().all(|c| c.is_ascii_uppercase()),
            })
        })
        .collect();

    let pool: Vec<&Candidate<'_>> = if candidates.iter().any(|c| c.explicit) {
        candidates.iter().filter(|c| c.explicit).collect()
    } else if candidates.len() > 1 {
        let listed: Vec<String> = candidates
            .iter()
            .map(|c| format!("'{} {}'", c.subject, c.number))
            .collect();
        return Err(AdvisorError::AmbiguousCourse(format!(
            "several possible courses ({})",
            listed.join(", ")
        )));
    } else {
        candidates.iter().collect()
    };

    if let Some(guess) = pool.iter().find(|c| c.explicit && c.number.len() == 4) {
        return Err(AdvisorError::AmbiguousCourse(format!(
            "4-digit course number {} {} is neither shorthand nor an official number",
            guess.subject.to_ascii_uppercase(),
            guess.number
        )));
    }

    let mut found: Vec<CourseMention> = Vec::new();
    let mut first_rejection: Option<AdvisorError> = None;
    for candidate in pool {
        match CourseKey::new(candidate.subject, candidate.number) {
            Ok(course) => {
                if !found.iter().any(|m| m.course == course) {
                    found.push(CourseMention {
                        course,
                        offset: candidate.offset,
                    });
                }
            }
            Err(e) => {
                if first_rejection.is_none() {
                    first_rejection = Some(e);
                }
            }
        }
    }

    if found.is_empty() {
        return Err(first_rejection.unwrap_or_else(|| {
            AdvisorError::AmbiguousCourse("no subject and course number found".to_string())
        }));
    }
    Ok(found)
}

/// Normalize a course number string to its 5-digit form
///
/// - 3 digits: shorthand, scaled by 100 ("250" -> 25000)
/// - 5 digits: already canonical
/// - anything else (including a 4-digit number or a leading zero) is rejected
pub fn normalize_course_number(digits: &str) -> Result<u32> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AdvisorError::AmbiguousCourse(format!(
            "'{}' is not a course number",
            digits
        )));
    }
    if digits.starts_with('0') {
        return Err(AdvisorError::AmbiguousCourse(format!(
            "course number {} has a leading zero",
            digits
        )));
    }

    let value: u32 = digits
        .parse()
        .map_err(|_| AdvisorError::AmbiguousCourse(format!("'{}' is out of range", digits)))?;

    match digits.len() {
        3 => Ok(value * 100),
        5 => Ok(value),
        n => Err(AdvisorError::AmbiguousCourse(format!(
            "{}-digit course number {} is neither shorthand nor an official number",
            n, digits
        ))),
    }
}
