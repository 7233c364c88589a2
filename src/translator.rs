/// Translation enricher module
///
/// Best-effort rewrite of a post's display text through the OpenAI chat
/// completions API. Failure is never fatal: the post always leaves this
/// module with usable text, at worst the untouched original.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::extractor::NormalizedPost;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct Translator {
    /// None means translation is unconfigured and enrichment no-ops.
    api_key: Option<String>,
    model: String,
    prompt_path: String,
    http: reqwest::Client,
}

impl Translator {
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.openai_api_key.clone(),
            model: config.gpt_model.clone(),
            prompt_path: config.translation_prompt_path.clone(),
            http: reqwest::Client::new(),
        }
    }

    /// Translate the post's text in place, preserving the original in
    /// `original_text`.
    ///
    /// Returns Err only to let the caller surface a warning: on any
    /// failure `post.text` is left as a copy of the original and the post
    /// remains deliverable. Empty text and an unconfigured translator are
    /// silent no-ops that leave the post untouched, so `original_text`
    /// is only set once a translation was actually attempted.
    pub async fn enrich(&self, post: &mut NormalizedPost) -> Result<()> {
        if post.text.is_empty() {
            return Ok(());
        }

        let Some(api_key) = &self.api_key else {
            return Ok(());
        };

        post.original_text = Some(post.text.clone());

        match self.translate(api_key, &post.text).await {
            Ok(translated) => {
                post.text = translated;
                Ok(())
            }
            Err(e) => Err(e.context(format!("translation failed for post {}", post.id))),
        }
    }

    async fn translate(&self, api_key: &str, text: &str) -> Result<String> {
        let prompt = tokio::fs::read_to_string(&self.prompt_path)
            .await
            .with_context(|| format!("Failed to read prompt template {}", self.prompt_path))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.trim().to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
        };

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            anyhow::bail!("OpenAI API error (status {}): {}", status, error_text);
        }

        let response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let translated = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .context("Empty translation returned")?;

        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator(api_key: Option<&str>) -> Translator {
        Translator {
            api_key: api_key.map(String::from),
            model: "gpt-4o-mini".to_string(),
            prompt_path: "does/not/exist.txt".to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn post(text: &str) -> NormalizedPost {
        NormalizedPost {
            id: "1".to_string(),
            text: text.to_string(),
            original_text: None,
            is_quote: false,
            is_retweet: false,
            created_at: "2024-01-01-10-00-00".to_string(),
            media: Vec::new(),
        }
    }

    #[tokio::test]
    async fn empty_text_is_left_untouched() {
        let mut p = post("");
        translator(Some("key")).enrich(&mut p).await.unwrap();
        assert_eq!(p.text, "");
        assert!(p.original_text.is_none());
    }

    #[tokio::test]
    async fn unconfigured_translator_leaves_the_post_untouched() {
        let mut p = post("привет мир");
        translator(None).enrich(&mut p).await.unwrap();
        assert_eq!(p.text, "привет мир");
        // No attempt was made, so no original is recorded either.
        assert!(p.original_text.is_none());
    }

    #[tokio::test]
    async fn failure_keeps_original_text_and_reports_it() {
        // The prompt path does not exist, so the translate step fails
        // before any network call.
        let mut p = post("hello");
        let result = translator(Some("key")).enrich(&mut p).await;
        assert!(result.is_err());
        assert_eq!(p.text, "hello");
        assert_eq!(p.original_text.as_deref(), Some("hello"));
    }
}
