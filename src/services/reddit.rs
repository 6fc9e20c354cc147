// Reddit-backed opinion search
//
// Uses Reddit's application-only OAuth flow: a client-credentials token is
// fetched per search (no cross-request caching), then the subreddit search
// endpoint is queried with relevance sort, a one-year window and a limit of
// five. There is no retry; any failure is reported as unavailable and the
// orchestrator carries on without opinions.

use super::traits::{OpinionSource, RedditCredentials};
use crate::error::{AdvisorError, Result, SourceKind};
use crate::evidence::{OpinionQuery, OpinionResult, MAX_OPINION_SNIPPETS};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Opinion source searching one subreddit
pub struct RedditOpinionSource {
    client: Client,
    credentials: Option<RedditCredentials>,
    user_agent: String,
    subreddit: String,
    token_url: String,
    api_base: String,
}

impl RedditOpinionSource {
    pub fn new(
        credentials: Option<RedditCredentials>,
        user_agent: String,
        subreddit: String,
    ) -> Self {
        Self {
            client: Client::new(),
            credentials,
            user_agent,
            subreddit,
            token_url: REDDIT_TOKEN_URL.to_string(),
            api_base: REDDIT_API_BASE.to_string(),
        }
    }

    /// Point the source at different endpoints (proxies, staging)
    pub fn with_endpoints(mut self, token_url: String, api_base: String) -> Self {
        self.token_url = token_url;
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self, credentials: &RedditCredentials) -> Result<String> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .header("User-Agent", &self.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| unavailable(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(unavailable(format!(
                "authentication failed with status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("malformed token response: {}", e)))?;

        Ok(token.access_token)
    }

    fn search_url(&self) -> String {
        format!("{}/r/{}/search", self.api_base, self.subreddit)
    }
}

/// Query string for a subreddit search
fn search_params(query: &OpinionQuery) -> Vec<(&'static str, String)> {
    vec![
        ("q", query.query_text.clone()),
        ("restrict_sr", "1".to_string()),
        ("sort", "relevance".to_string()),
        ("t", "year".to_string()),
        ("limit", MAX_OPINION_SNIPPETS.to_string()),
        ("raw_json", "1".to_string()),
    ]
}

/// Post titles from a search listing, in listing order
fn listing_titles(listing: Listing) -> Vec<String> {
    listing
        .data
        .children
        .into_iter()
        .map(|child| child.data.title.trim().to_string())
        .filter(|title| !title.is_empty())
        .take(MAX_OPINION_SNIPPETS)
        .collect()
}

fn unavailable(reason: String) -> AdvisorError {
    AdvisorError::unavailable(SourceKind::Opinions, reason)
}

#[async_trait]
impl OpinionSource for RedditOpinionSource {
    async fn search(&self, query: &OpinionQuery) -> Result<OpinionResult> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| unavailable("Reddit credentials are not configured".to_string()))?;

        tracing::info!("Searching r/{} for: {}", self.subreddit, query.query_text);

        let token = self.access_token(credentials).await?;

        let response = self
            .client
            .get(self.search_url())
            .bearer_auth(token)
            .header("User-Agent", &self.user_agent)
            .query(&search_params(query))
            .send()
            .await
            .map_err(|e| unavailable(format!("search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(unavailable(format!(
                "search failed with status {}",
                response.status()
            )));
        }

        let listing: Listing = response
            .json()
            .await
            .map_err(|e| unavailable(format!("malformed search listing: {}", e)))?;

        let titles = listing_titles(listing);
        tracing::debug!("r/{} returned {} posts", self.subreddit, titles.len());

        Ok(OpinionResult::new(titles))
    }
}

// Reddit API types
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: PostData,
}

#[derive(Debug, Deserialize)]
struct PostData {
    #[serde(default)]
    title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_credentials_is_soft_failure() {
        let source = RedditOpinionSource::new(None, "test-agent".to_string(), "purdue".to_string());
        let query = OpinionQuery {
            query_text: "Adams 250".to_string(),
        };

        let err = source.search(&query).await.unwrap_err();
        assert!(err.is_soft());
        assert!(matches!(
            err,
            AdvisorError::DataSourceUnavailable { kind: SourceKind::Opinions, .. }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_soft_failure() {
        let credentials = RedditCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        };
        // Port 9 (discard) on localhost is not listening in test environments
        let source = RedditOpinionSource::new(
            Some(credentials),
            "test-agent".to_string(),
            "purdue".to_string(),
        )
        .with_endpoints(
            "http://127.0.0.1:9/api/v1/access_token".to_string(),
            "http://127.0.0.1:9/".to_string(),
        );
        let query = OpinionQuery {
            query_text: "CS 250".to_string(),
        };

        let err = source.search(&query).await.unwrap_err();
        assert!(err.is_soft());
    }

    #[test]
    fn test_search_params() {
        let query = OpinionQuery {
            query_text: "Sellke 416".to_string(),
        };
        let params = search_params(&query);

        assert!(params.contains(&("q", "Sellke 416".to_string())));
        assert!(params.contains(&("restrict_sr", "1".to_string())));
        assert!(params.contains(&("sort", "relevance".to_string())));
        assert!(params.contains(&("t", "year".to_string())));
        assert!(params.contains(&("limit", "5".to_string())));
    }

    #[test]
    fn test_search_url_uses_subreddit() {
        let source = RedditOpinionSource::new(None, "ua".to_string(), "purdue".to_string())
            .with_endpoints("http://auth".to_string(), "http://api/".to_string());
        assert_eq!(source.search_url(), "http://api/r/purdue/search");
    }

    #[test]
    fn test_listing_titles_keep_rank_order() {
        let body = r#"{
            "kind": "Listing",
            "data": {
                "children": [
                    { "kind": "t3", "data": { "title": "Adams CS 250 exam 2 was brutal" } },
                    { "kind": "t3", "data": { "title": "  " } },
                    { "kind": "t3", "data": { "title": "Is CS 250 a lot of work?" } }
                ]
            }
        }"#;

        let listing: Listing = serde_json::from_str(body).unwrap();
        let titles = listing_titles(listing);

        assert_eq!(
            titles,
            vec![
                "Adams CS 250 exam 2 was brutal".to_string(),
                "Is CS 250 a lot of work?".to_string(),
            ]
        );
    }
}
