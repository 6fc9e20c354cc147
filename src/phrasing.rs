// Optional LLM rewording of the verdict rationale
//
// The model sees the finished assessment and may only restate the reasoning
// in a friendlier voice. Band, GPA and post titles are rendered from the
// verdict, never from model output.

use crate::advisor::Assessment;
use crate::chat::{render_reply, render_reply_with_rationale};
use crate::llm::{LlmAdapter, LlmRequest, Message, DEFAULT_LLM_TIMEOUT};
use crate::synthesizer::{contains_phrase, DifficultyBand};
use std::sync::Arc;
use std::time::Duration;

const PHRASING_PROMPT: &str = "You are a friendly Purdue academic advisor. Rewrite the reasoning \
below in two or three conversational sentences for a student. Keep the difficulty rating word \
exactly as given, keep every number unchanged, and do not add facts. Reply with the rewritten \
reasoning only.";

const RATED_BANDS: [DifficultyBand; 4] = [
    DifficultyBand::Easy,
    DifficultyBand::Moderate,
    DifficultyBand::Hard,
    DifficultyBand::VeryHard,
];

pub struct VerdictPhraser {
    llm: Arc<dyn LlmAdapter>,
    model: Option<String>,
    timeout: Duration,
}

impl VerdictPhraser {
    pub fn new(llm: Arc<dyn LlmAdapter>) -> Self {
        Self {
            llm,
            model: None,
            timeout: DEFAULT_LLM_TIMEOUT,
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

    /// Full reply text; the deterministic rendering on any model failure
    pub async fn phrase(&self, assessment: &Assessment) -> String {
        match self.reword(assessment).await {
            Ok(rationale) => render_reply_with_rationale(assessment, &rationale),
            Err(e) => {
                tracing::warn!("Rationale phrasing failed, using plain text: {}", e);
                render_reply(assessment)
            }
        }
    }

    async fn reword(&self, assessment: &Assessment) -> anyhow::Result<String> {
        let verdict = &assessment.verdict;
        let band = verdict.difficulty_band.label();
        let prompt = format!(
            "Question: {}\nDifficulty rating: {}\nReasoning: {}",
            assessment.question, band, verdict.rationale
        );

        let messages = vec![Message::system(PHRASING_PROMPT), Message::user(prompt)];
        let mut request = LlmRequest::new(messages)
            .with_temperature(0.3)
            .with_max_tokens(300);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }

        let response = tokio::time::timeout(self.timeout, self.llm.complete_chat(request))
            .await
            .map_err(|_| {
                anyhow::anyhow!("no model reply within {} ms", self.timeout.as_millis())
            })??;
        let text = response.content.trim().to_string();

        if text.is_empty() {
            anyhow::bail!("model returned an empty rewrite");
        }
        if !keeps_rating(&text, verdict.difficulty_band) {
            anyhow::bail!("rewrite does not state the '{}' rating plainly", band);
        }

        Ok(text)
    }
}

/// True when `text` names `band` as a whole phrase, never negates it and
/// never names another band
fn keeps_rating(text: &str, band: DifficultyBand) -> bool {
    let text = text
        .to_lowercase()
        .replace("n't", " not")
        .replace("n\u{2019}t", " not");
    let own = band.label();
    if !contains_phrase(&text, own) {
        return false;
    }

    for prefix in ["not", "not that", "not too", "not very", "never", "hardly"] {
        if contains_phrase(&text, &format!("{} {}", prefix, own)) {
            return false;
        }
    }

    // "very hard" contains "hard", so the longer label is checked on its own
    let very_hard = DifficultyBand::VeryHard.label();
    let rest = if band == DifficultyBand::VeryHard {
        text.replace(very_hard, " ")
    } else if contains_phrase(&text, very_hard) {
        return false;
    } else {
        text.clone()
    };

    !RATED_BANDS
        .iter()
        .filter(|other| **other != band && **other != DifficultyBand::VeryHard)
        .any(|other| contains_phrase(&rest, other.label()))
}
