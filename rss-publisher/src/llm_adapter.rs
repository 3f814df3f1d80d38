use crate::rss_utils::html::{extract_text_from_html, strip_code_fence};
use crate::types::{ArticleSource, PublisherError, Result, RewrittenArticle, TextRewriter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const MAX_SOURCE_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You are a news editor. Rewrite the supplied article in your own words as an \
original blog post. Answer with a single JSON object with the keys: title, metaDescription, \
keywords (array of up to 8 short strings), altText, imageTitleText, bodyHtml. bodyHtml must be \
clean HTML using only <h2>, <h3>, <p>, <ul>, <ol>, <li>, <strong> and <em>. Do not include links, \
images, figures or the original title inside bodyHtml.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat-completions backed rewriter (OpenAI or any compatible endpoint)
pub struct OpenAiRewriter {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiRewriter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| PublisherError::Config(format!("invalid OpenAI API key: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn complete(&self, user_prompt: String) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                WireMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.7,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        debug!(model = %self.model, "OpenAI chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PublisherError::General(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PublisherError::General("No response from OpenAI".to_string()))
    }
}

pub fn build_user_prompt(source: &ArticleSource) -> String {
    let mut body = extract_text_from_html(&source.body);
    if body.chars().count() > MAX_SOURCE_CHARS {
        body = body.chars().take(MAX_SOURCE_CHARS).collect();
    }
    format!(
        "Title: {}\n\nSummary: {}\n\nArticle:\n{}",
        source.title.trim(),
        extract_text_from_html(&source.snippet),
        body
    )
}

/// Reads the model reply. Anything that is not the expected JSON is taken as the body itself.
pub fn parse_rewrite_reply(reply: &str) -> Result<RewrittenArticle> {
    let unfenced = strip_code_fence(reply);
    match serde_json::from_str::<RewrittenArticle>(unfenced) {
        Ok(article) if !article.body_html.trim().is_empty() => Ok(article),
        Ok(_) => Err(PublisherError::Parse("rewriter returned an empty bodyHtml".to_string())),
        Err(e) if unfenced.starts_with('{') => Err(PublisherError::Parse(format!(
            "rewriter returned malformed JSON: {}",
            e
        ))),
        Err(_) => {
            warn!("Rewriter reply was not JSON, using it as the article body");
            Ok(RewrittenArticle {
                body_html: unfenced.to_string(),
                ..Default::default()
            })
        }
    }
}

#[async_trait]
impl TextRewriter for OpenAiRewriter {
    fn rewriter_name(&self) -> String {
        format!("openai ({})", self.model)
    }

    async fn rewrite(&self, source: &ArticleSource) -> anyhow::Result<RewrittenArticle> {
        let reply = self.complete(build_user_prompt(source)).await?;
        Ok(parse_rewrite_reply(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structured_reply() {
        let reply = r#"```json
{"title":"Phone X arrives","metaDescription":"m","keywords":["phones","launch"],"altText":"a phone","imageTitleText":"Phone X","bodyHtml":"<p>Hello</p>"}
```"#;
        let article = parse_rewrite_reply(reply).unwrap();
        assert_eq!(article.title.as_deref(), Some("Phone X arrives"));
        assert_eq!(article.keywords, vec!["phones", "launch"]);
        assert_eq!(article.alt_text.as_deref(), Some("a phone"));
        assert_eq!(article.body_html, "<p>Hello</p>");
    }

    #[test]
    fn plain_html_reply_becomes_body() {
        let article = parse_rewrite_reply("<p>Just html</p>").unwrap();
        assert_eq!(article.body_html, "<p>Just html</p>");
        assert!(article.title.is_none());
    }

    #[test]
    fn broken_json_and_empty_body_are_errors() {
        assert!(parse_rewrite_reply(r#"{"bodyHtml": "#).is_err());
        assert!(parse_rewrite_reply(r#"{"title":"x","bodyHtml":"  "}"#).is_err());
    }

    #[test]
    fn prompt_uses_plain_text() {
        let prompt = build_user_prompt(&ArticleSource {
            title: "T".to_string(),
            snippet: "<b>s</b>".to_string(),
            body: "<p>one <a href='x'>two</a></p>".to_string(),
        });
        assert!(prompt.contains("Summary: s"));
        assert!(prompt.contains("one two"));
        assert!(!prompt.contains("<a"));
    }
}
