// Configuration service implementation
//
// Secrets (Reddit and OpenRouter keys) come from environment variables, with
// a .env file loaded first when present. The difficulty policy can be
// overridden from a JSON file named by ADVISOR_POLICY_PATH.

use super::traits::{ConfigService, RedditCredentials};
use crate::error::{AdvisorError, Result};
use crate::synthesizer::DifficultyPolicy;
use crate::version;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "grades_improved.db";
const DEFAULT_SUBREDDIT: &str = "purdue";
const DEFAULT_MODEL: &str = "anthropic/claude-3.5-haiku";
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Environment-backed configuration
///
/// Environment Variables:
/// - GRADES_DB_PATH (optional): grade store, defaults to grades_improved.db
/// - REDDIT_CLIENT_ID / REDDIT_CLIENT_SECRET (optional, both or neither)
/// - REDDIT_USER_AGENT (optional): defaults to Purdue-Course-Advisor/v<version>
/// - REDDIT_SUBREDDIT (optional): defaults to purdue
/// - SOURCE_TIMEOUT_MS (optional): per-source timeout, defaults to 5000
/// - OPENROUTER_API_KEY (optional): enables LLM parsing and phrasing
/// - ADVISOR_MODEL (optional): defaults to anthropic/claude-3.5-haiku
/// - ADVISOR_POLICY_PATH (optional): JSON difficulty policy
#[derive(Debug, Clone)]
pub struct EnvConfigService {
    grades_db_path: PathBuf,
    reddit_credentials: Option<RedditCredentials>,
    reddit_user_agent: String,
    subreddit: String,
    source_timeout: Duration,
    llm_api_key: Option<String>,
    model: String,
    policy_path: Option<PathBuf>,
}

impl EnvConfigService {
    /// Load configuration from the environment (and .env, if any)
    ///
    /// # Errors
    /// - EnvError if only one of the Reddit credentials is set
    /// - EnvError if SOURCE_TIMEOUT_MS is not a positive integer
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let client_id = non_empty_var("REDDIT_CLIENT_ID");
        let client_secret = non_empty_var("REDDIT_CLIENT_SECRET");
        let reddit_credentials = match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Some(RedditCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            _ => {
                return Err(AdvisorError::EnvError(
                    "REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET must be set together".to_string(),
                ))
            }
        };

        let source_timeout = match non_empty_var("SOURCE_TIMEOUT_MS") {
            Some(raw) => {
                let ms: u64 = raw.parse().map_err(|_| {
                    AdvisorError::EnvError(format!("SOURCE_TIMEOUT_MS is not a number: {}", raw))
                })?;
                if ms == 0 {
                    return Err(AdvisorError::EnvError(
                        "SOURCE_TIMEOUT_MS must be greater than zero".to_string(),
                    ));
                }
                Duration::from_millis(ms)
            }
            None => Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };

        Ok(Self {
            grades_db_path: non_empty_var("GRADES_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            reddit_credentials,
            reddit_user_agent: non_empty_var("REDDIT_USER_AGENT")
                .unwrap_or_else(version::user_agent),
            subreddit: non_empty_var("REDDIT_SUBREDDIT")
                .unwrap_or_else(|| DEFAULT_SUBREDDIT.to_string()),
            source_timeout,
            llm_api_key: non_empty_var("OPENROUTER_API_KEY"),
            model: non_empty_var("ADVISOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            policy_path: non_empty_var("ADVISOR_POLICY_PATH").map(PathBuf::from),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ConfigService for EnvConfigService {
    fn grades_db_path(&self) -> PathBuf {
        self.grades_db_path.clone()
    }

    fn reddit_credentials(&self) -> Option<RedditCredentials> {
        self.reddit_credentials.clone()
    }

    fn reddit_user_agent(&self) -> String {
        self.reddit_user_agent.clone()
    }

    fn subreddit(&self) -> String {
        self.subreddit.clone()
    }

    fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    fn llm_api_key(&self) -> Option<String> {
        self.llm_api_key.clone()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn difficulty_policy(&self) -> Result<DifficultyPolicy> {
        match &self.policy_path {
            Some(path) => DifficultyPolicy::from_json_file(path).map_err(|e| {
                AdvisorError::ConfigError(format!(
                    "Failed to load difficulty policy from {}: {}",
                    path.display(),
                    e
                ))
            }),
            None => Ok(DifficultyPolicy::default()),
        }
    }
}
