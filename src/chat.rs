// Chat wire types and the deterministic reply renderer

use crate::advisor::Assessment;
use crate::synthesizer::DifficultyBand;
use serde::{Deserialize, Serialize};

/// Reply text for a request without a question
pub const EMPTY_MESSAGE_REPLY: &str = "No message provided";

fn default_session_id() -> String {
    "default".to_string()
}

/// One chat turn posted by a front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// Accepted for compatibility; conversations are stateless
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: default_session_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Plain-text answer built only from the assessment
pub fn render_reply(assessment: &Assessment) -> String {
    render_reply_with_rationale(assessment, &assessment.verdict.rationale)
}

/// Same layout as `render_reply`, with the rationale paragraph swapped out
///
/// Band, GPA and post titles always come from the verdict itself.
pub fn render_reply_with_rationale(assessment: &Assessment, rationale: &str) -> String {
    let verdict = &assessment.verdict;
    let mut lines = Vec::new();

    let mut heading = assessment.course.to_string();
    if let Some(title) = &assessment.course_title {
        heading.push_str(&format!(" ({})", title));
    }
    if let Some(instructor) = &assessment.instructor {
        heading.push_str(&format!(" with {}", instructor));
    }
    if let Some(period) = &assessment.period {
        heading.push_str(&format!(", {}", period));
    }
    lines.push(format!(
        "{}: {}",
        heading,
        verdict.difficulty_band.label().to_uppercase()
    ));
    lines.push(rationale.trim().to_string());
    lines.push(String::new());

    match verdict.grade_metric {
        Some(metric) => lines.push(format!("Average GPA estimate: {:.2}", metric)),
        None => lines.push("Average GPA estimate: not available".to_string()),
    }
    if assessment.grade_error.is_some() {
        lines.push("(The grade database could not be reached for this answer.)".to_string());
    }

    if verdict.opinion_snippets.is_empty() {
        lines.push("Community posts: none found".to_string());
    } else {
        lines.push("Community posts:".to_string());
        for snippet in &verdict.opinion_snippets {
            lines.push(format!("  - {}", snippet));
        }
    }
    if assessment.opinion_error.is_some() {
        lines.push("(Community search was unavailable, so this leans on grades only.)".to_string());
    }

    lines.push(String::new());
    lines.push(format!("Bottom line: {}", bottom_line(verdict.difficulty_band)));

    lines.join("\n")
}

/// Side-by-side reply for a comparison question
///
/// `bodies` holds the per-option reply text, in the same order as
/// `assessments`; the closing line ranks options by band only.
pub fn render_comparison(assessments: &[Assessment], bodies: &[String]) -> String {
    let mut sections = vec![format!("Comparing {} options:", assessments.len())];
    sections.extend(bodies.iter().cloned());
    sections.push(comparison_summary(assessments));
    sections.join("\n\n")
}

fn option_label(assessment: &Assessment) -> String {
    match &assessment.instructor {
        Some(instructor) => format!("{} with {}", assessment.course, instructor),
        None => assessment.course.to_string(),
    }
}

fn comparison_summary(assessments: &[Assessment]) -> String {
    let rated: Vec<&Assessment> = assessments
        .iter()
        .filter(|a| a.verdict.difficulty_band != DifficultyBand::Unknown)
        .collect();

    let Some(easiest) = rated.iter().map(|a| a.verdict.difficulty_band).min() else {
        return "Not enough evidence to rank these options.".to_string();
    };
    let band = easiest.label().to_uppercase();

    let tied = rated.iter().all(|a| a.verdict.difficulty_band == easiest);
    let mut summary = if rated.len() > 1 && tied {
        format!("All rated options come out {} on this evidence.", band)
    } else {
        let labels: Vec<String> = rated
            .iter()
            .filter(|a| a.verdict.difficulty_band == easiest)
            .map(|a| option_label(a))
            .collect();
        format!("Easiest on this evidence: {} ({}).", labels.join(" and "), band)
    };

    let unrated: Vec<String> = assessments
        .iter()
        .filter(|a| a.verdict.difficulty_band == DifficultyBand::Unknown)
        .map(option_label)
        .collect();
    if !unrated.is_empty() {
        summary.push_str(&format!(" Not enough data for {}.", unrated.join(" or ")));
    }
    summary
}

fn bottom_line(band: DifficultyBand) -> &'static str {
    match band {
        DifficultyBand::Easy => "this one is generally manageable.",
        DifficultyBand::Moderate => "expect a fair amount of work, but nothing unusual.",
        DifficultyBand::Hard => "plan the rest of your schedule around it.",
        DifficultyBand::VeryHard => "take it with a light load and start assignments early.",
        DifficultyBand::Unknown => {
            "there is not enough data to call it; ask students who took it recently."
        }
    }
}
