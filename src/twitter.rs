/// Upstream timeline API client (RapidAPI-hosted Twitter gateway).
///
/// Errors are returned as values: a failed request becomes a
/// `TwitterError`, never a panic, and callers decide how to surface it.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::extractor::{extract_posts, NormalizedPost};
use crate::filter::filter_posts;
use crate::rate_limit::RateLimitReading;

/// Everything one fetch needs to know: which timeline, what counts as
/// "new", and whether retweets are wanted.
#[derive(Debug, Clone)]
pub struct PollWindow {
    pub twitter_id: String,
    pub cutoff: Option<String>,
    pub exclude_retweets: bool,
}

/// Result of one timeline fetch: the already-filtered new posts plus the
/// quota reading the gateway reported for this call.
#[derive(Debug)]
pub struct TweetsPage {
    pub posts: Vec<NormalizedPost>,
    pub rate_limit: Option<RateLimitReading>,
}

/// Result of resolving a handle to the upstream account id.
#[derive(Debug)]
pub struct UserLookup {
    pub external_id: String,
    pub rate_limit: Option<RateLimitReading>,
}

#[derive(Debug, Error)]
pub enum TwitterError {
    /// Structured error payload from the API (4xx/5xx with a message).
    #[error("upstream API error: {0}")]
    Api(String),

    /// Network failure, timeout or protocol error before a response.
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response arrived but did not contain what we expected.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

pub struct TwitterClient {
    api_host: String,
    api_key: String,
    http: reqwest::Client,
}

impl TwitterClient {
    /// Build the client. Every request made through it carries a bounded
    /// timeout, so a construction failure is surfaced rather than worked
    /// around with an unbounded client.
    pub fn new(api_host: &str, api_key: &str) -> Result<Self, TwitterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            api_host: api_host.to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    /// Fetch a channel's timeline and return the posts that are new for
    /// the given window, in document order.
    pub async fn get_user_tweets(
        &self,
        window: &PollWindow,
        count: u32,
    ) -> Result<TweetsPage, TwitterError> {
        let count = count.to_string();
        let (body, rate_limit) = self
            .request(
                "user-tweets",
                &[("user", window.twitter_id.as_str()), ("count", count.as_str())],
            )
            .await?;

        let posts = extract_posts(&body);
        let posts = filter_posts(posts, window.cutoff.as_deref(), window.exclude_retweets);

        Ok(TweetsPage { posts, rate_limit })
    }

    /// Resolve a public handle (with or without a leading `@`) to the
    /// opaque upstream account id.
    pub async fn get_user_by_handle(&self, handle: &str) -> Result<UserLookup, TwitterError> {
        let handle = handle.trim_start_matches('@');

        let (body, rate_limit) = self.request("user", &[("username", handle)]).await?;

        let external_id = body
            .pointer("/result/data/user/result/rest_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TwitterError::Malformed(format!("no rest_id in user lookup for @{}", handle))
            })?
            .to_string();

        Ok(UserLookup { external_id, rate_limit })
    }

    async fn request(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<(Value, Option<RateLimitReading>), TwitterError> {
        let url = format!("https://{}/{}", self.api_host, endpoint);

        let response = self
            .http
            .get(&url)
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.api_host)
            .query(params)
            .send()
            .await?;

        let rate_limit = RateLimitReading::from_headers(response.headers());
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // The gateway usually puts a human-readable reason under
            // "message"; fall back to the raw body.
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or(text);
            return Err(TwitterError::Api(format!("HTTP {}: {}", status, message)));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| TwitterError::Malformed(e.to_string()))?;

        Ok((body, rate_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_constructs_with_its_timeout_in_place() {
        assert!(TwitterClient::new("example.com", "key").is_ok());
    }
}
