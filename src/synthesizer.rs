// Evidence synthesis: the deterministic difficulty decision table
//
// Grade data sets the baseline band, community post titles can escalate or
// downgrade it. The language model never takes part in this decision; it can
// only rephrase the rationale afterwards.
//
// Decision table (defaults, see `DifficultyPolicy`):
//   no metric, no opinions      -> UNKNOWN
//   metric < 2.8                -> HARD, VERY_HARD on strong negativity
//   2.8 <= metric < 3.0         -> MODERATE, HARD when >= 2 posts mention difficulty
//   metric >= 3.0               -> EASY, one band harder on strong negativity
//   no metric, opinions present -> keyword-only band, capped at MODERATE

use crate::error::{AdvisorError, Result};
use crate::evidence::{GradeResult, OpinionResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Highest value a normalized GPA estimate can take
const MAX_GPA: f64 = 4.0;

/// Difficulty classification, ordered from easiest to hardest
///
/// `Unknown` sorts last but is never produced by escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyBand {
    Easy,
    Moderate,
    Hard,
    VeryHard,
    Unknown,
}

impl DifficultyBand {
    /// One band harder; VeryHard and Unknown stay put
    pub fn harder(self) -> Self {
        match self {
            DifficultyBand::Easy => DifficultyBand::Moderate,
            DifficultyBand::Moderate => DifficultyBand::Hard,
            DifficultyBand::Hard => DifficultyBand::VeryHard,
            other => other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DifficultyBand::Easy => "easy",
            DifficultyBand::Moderate => "moderate",
            DifficultyBand::Hard => "hard",
            DifficultyBand::VeryHard => "very hard",
            DifficultyBand::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DifficultyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Thresholds and keyword sets driving the classification
///
/// The defaults mirror the advisor's long-standing heuristics; deployments
/// can override any field from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyPolicy {
    /// Metrics below this are HARD
    pub hard_below: f64,
    /// Metrics at or above this are EASY
    pub easy_from: f64,
    /// Posts mentioning difficulty needed to escalate MODERATE to HARD
    pub escalation_min_posts: usize,
    /// Highest band allowed when only opinions are available
    pub opinion_only_cap: DifficultyBand,
    pub strong_negativity_keywords: Vec<String>,
    pub difficulty_keywords: Vec<String>,
}

impl Default for DifficultyPolicy {
    fn default() -> Self {
        Self {
            hard_below: 2.8,
            easy_from: 3.0,
            escalation_min_posts: 2,
            opinion_only_cap: DifficultyBand::Moderate,
            strong_negativity_keywords: [
                "brutal", "impossible", "awful", "terrible", "horrible", "nightmare", "worst",
                "miserable",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
            difficulty_keywords: [
                "hard", "difficult", "a lot of work", "tough exams", "tough", "curve",
                "ambiguous", "heavy workload", "time consuming", "weed out",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
        }
    }
}

impl DifficultyPolicy {
    /// Load a policy from a JSON file; missing fields keep their defaults
    ///
    /// # Errors
    /// - IO or JSON errors reading the file
    /// - ConfigError if the thresholds are inconsistent
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let policy: DifficultyPolicy = serde_json::from_str(&content)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.hard_below.is_finite() && self.easy_from.is_finite()) {
            return Err(AdvisorError::ConfigError(
                "difficulty thresholds must be finite".to_string(),
            ));
        }
        if self.hard_below > self.easy_from {
            return Err(AdvisorError::ConfigError(format!(
                "hard_below ({}) must not exceed easy_from ({})",
                self.hard_below, self.easy_from
            )));
        }
        if self.opinion_only_cap == DifficultyBand::Unknown {
            return Err(AdvisorError::ConfigError(
                "opinion_only_cap must be a real band".to_string(),
            ));
        }
        Ok(())
    }
}

/// The single output artifact of a question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub difficulty_band: DifficultyBand,
    pub rationale: String,
    pub grade_metric: Option<f64>,
    pub opinion_snippets: Vec<String>,
}

/// Keyword hits found in the opinion snippets
struct OpinionSignals {
    /// First strong-negativity keyword seen, if any
    strong_keyword: Option<String>,
    /// Number of snippets containing a difficulty keyword
    difficulty_posts: usize,
    /// First difficulty keyword seen, if any
    difficulty_keyword: Option<String>,
}

/// Pure classifier: same inputs, same verdict
#[derive(Debug, Clone, Default)]
pub struct EvidenceSynthesizer {
    policy: DifficultyPolicy,
}

impl EvidenceSynthesizer {
    pub fn new(policy: DifficultyPolicy) -> Self {
        Self { policy }
    }

    /// Classify difficulty from grade and opinion evidence
    ///
    /// Either input may be empty. Drains the opinion iterator.
    ///
    /// # Errors
    /// - `UnexpectedSynthesisInput` if the metric is not a GPA on the 0-4 scale
    pub fn synthesize(&self, grades: &GradeResult, opinions: OpinionResult) -> Result<Verdict> {
        if let Some(metric) = grades.metric {
            if !metric.is_finite() || !(0.0..=MAX_GPA).contains(&metric) {
                return Err(AdvisorError::UnexpectedSynthesisInput(format!(
                    "grade metric {} is outside the 0-4 GPA scale",
                    metric
                )));
            }
        }

        let snippets: Vec<String> = opinions.collect();
        let signals = self.scan(&snippets);

        let (base, band) = match grades.metric {
            None if snippets.is_empty() => (DifficultyBand::Unknown, DifficultyBand::Unknown),
            None => {
                let band = self.opinion_only_band(&signals).min(self.policy.opinion_only_cap);
                (band, band)
            }
            Some(metric) if metric < self.policy.hard_below => {
                let band = if signals.strong_keyword.is_some() {
                    DifficultyBand::VeryHard
                } else {
                    DifficultyBand::Hard
                };
                (DifficultyBand::Hard, band)
            }
            Some(metric) if metric < self.policy.easy_from => {
                let band = if signals.difficulty_posts >= self.policy.escalation_min_posts {
                    DifficultyBand::Hard
                } else {
                    DifficultyBand::Moderate
                };
                (DifficultyBand::Moderate, band)
            }
            Some(_) => {
                let band = if signals.strong_keyword.is_some() {
                    DifficultyBand::Easy.harder()
                } else {
                    DifficultyBand::Easy
                };
                (DifficultyBand::Easy, band)
            }
        };

        let rationale = self.rationale(grades, &snippets, &signals, base, band);

        Ok(Verdict {
            difficulty_band: band,
            rationale,
            grade_metric: grades.metric,
            opinion_snippets: snippets,
        })
    }

    fn scan(&self, snippets: &[String]) -> OpinionSignals {
        let mut signals = OpinionSignals {
            strong_keyword: None,
            difficulty_posts: 0,
            difficulty_keyword: None,
        };

        for snippet in snippets {
            let lowered = snippet.to_lowercase();

            if signals.strong_keyword.is_none() {
                signals.strong_keyword =
                    first_keyword(&lowered, &self.policy.strong_negativity_keywords);
            }

            if let Some(keyword) = first_keyword(&lowered, &self.policy.difficulty_keywords) {
                signals.difficulty_posts += 1;
                if signals.difficulty_keyword.is_none() {
                    signals.difficulty_keyword = Some(keyword);
                }
            }
        }

        signals
    }

    fn opinion_only_band(&self, signals: &OpinionSignals) -> DifficultyBand {
        if signals.strong_keyword.is_some() {
            DifficultyBand::VeryHard
        } else if signals.difficulty_posts >= self.policy.escalation_min_posts {
            DifficultyBand::Hard
        } else if signals.difficulty_posts > 0 {
            DifficultyBand::Moderate
        } else {
            DifficultyBand::Easy
        }
    }

    fn rationale(
        &self,
        grades: &GradeResult,
        snippets: &[String],
        signals: &OpinionSignals,
        base: DifficultyBand,
        band: DifficultyBand,
    ) -> String {
        let grade_clause = match grades.metric {
            Some(metric) => format!(
                "Past sections averaged a {:.2} GPA estimate ({})",
                metric, grades.sample_note
            ),
            None => format!("No GPA estimate was available ({})", grades.sample_note),
        };

        let opinion_clause = if snippets.is_empty() {
            "no recent community discussion turned up".to_string()
        } else {
            let posts = plural(snippets.len(), "recent community post", "recent community posts");
            match (&signals.strong_keyword, &signals.difficulty_keyword) {
                (Some(strong), _) => format!(
                    "{} turned up, with strongly negative language (\"{}\")",
                    posts, strong
                ),
                (None, Some(keyword)) => format!(
                    "{} turned up, {} mentioning difficulty (\"{}\")",
                    posts, signals.difficulty_posts, keyword
                ),
                (None, None) => format!("{} turned up, none signalling difficulty", posts),
            }
        };

        let conclusion = match (grades.metric, band) {
            (_, DifficultyBand::Unknown) => {
                "There is not enough evidence to rate its difficulty.".to_string()
            }
            (None, _) => format!(
                "Rated {} from student chatter alone, \
                 which caps the rating at {} without grade data.",
                band, self.policy.opinion_only_cap
            ),
            (Some(metric), _) if band != base => {
                let mut text = format!(
                    "The GPA alone points to {}, but the student comments push it to {}",
                    base, band
                );
                if metric >= self.policy.easy_from {
                    text.push_str(
                        " (high grades with harsh comments often mean \
                         a generous curve on a rough class)",
                    );
                }
                text.push('.');
                text
            }
            (Some(_), _) if snippets.is_empty() => {
                format!("Rated {} on the grade data alone.", band)
            }
            (Some(_), _) => format!(
                "Rated {} on the grade data, and the student comments do not change that.",
                band
            ),
        };

        format!("{}; {}. {}", grade_clause, opinion_clause, conclusion)
    }
}

/// First keyword occurring in `text` as a whole word or phrase
fn first_keyword(text: &str, keywords: &[String]) -> Option<String> {
    keywords
        .iter()
        .find(|keyword| contains_phrase(text, &keyword.to_lowercase()))
        .cloned()
}

/// Phrase match that does not fire inside longer words ("hard" vs "hardware")
pub(crate) fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }

    text.match_indices(phrase).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("1 {}", one)
    } else {
        format!("{} {}", count, many)
    }
}
