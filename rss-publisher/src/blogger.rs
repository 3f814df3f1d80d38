use crate::types::{ImageAsset, PostDraft, PublishedPost, Publisher, PublisherError, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const BLOGGER_API_URL: &str = "https://www.googleapis.com/blogger/v3";
const IMGBB_UPLOAD_URL: &str = "https://api.imgbb.com/1/upload";

#[derive(Debug, Serialize)]
struct InsertPostRequest<'a> {
    kind: &'static str,
    title: &'a str,
    content: &'a str,
    labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct InsertPostResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImgbbResponse {
    data: Option<ImgbbImage>,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct ImgbbImage {
    url: String,
}

/// Publishes through the Blogger v3 API; images go to ImgBB when a key is configured.
pub struct BloggerPublisher {
    blog_id: String,
    access_token: String,
    imgbb_api_key: Option<String>,
    as_draft: bool,
    http: reqwest::Client,
}

impl BloggerPublisher {
    pub fn new(blog_id: String, access_token: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            blog_id,
            access_token,
            imgbb_api_key: None,
            as_draft: false,
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn with_image_host(mut self, imgbb_api_key: Option<String>) -> Self {
        self.imgbb_api_key = imgbb_api_key;
        self
    }

    pub fn as_draft(mut self, as_draft: bool) -> Self {
        self.as_draft = as_draft;
        self
    }

    async fn insert_post(&self, draft: &PostDraft) -> Result<PublishedPost> {
        let url = format!("{}/blogs/{}/posts/", BLOGGER_API_URL, self.blog_id);
        let request = InsertPostRequest {
            kind: "blogger#post",
            title: &draft.title,
            content: &draft.html_content,
            labels: &draft.labels,
        };

        debug!(blog_id = %self.blog_id, title = %draft.title, "Blogger posts.insert");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(&[("isDraft", self.as_draft)])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PublisherError::General(format!(
                "Blogger API error ({}): {}",
                status, error_text
            )));
        }

        let created: InsertPostResponse = response.json().await?;
        let post = PublishedPost {
            url: created.url.unwrap_or_default(),
            id: created.id,
        };
        info!("Blogger post created: {} {}", post.id, post.url);
        Ok(post)
    }

    async fn upload_to_imgbb(&self, api_key: &str, image: &ImageAsset) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        let name = format!("article.{}", image.file_extension());

        let response = self
            .http
            .post(IMGBB_UPLOAD_URL)
            .query(&[("key", api_key)])
            .form(&[("image", encoded.as_str()), ("name", name.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PublisherError::General(format!(
                "ImgBB upload error ({}): {}",
                status, error_text
            )));
        }

        let uploaded: ImgbbResponse = response.json().await?;
        match uploaded.data {
            Some(data) if uploaded.success && !data.url.is_empty() => Ok(data.url),
            _ => Err(PublisherError::General("ImgBB upload returned no URL".to_string())),
        }
    }
}

#[async_trait]
impl Publisher for BloggerPublisher {
    async fn upload_image(&self, image: &ImageAsset) -> anyhow::Result<String> {
        let api_key = self
            .imgbb_api_key
            .as_deref()
            .ok_or_else(|| PublisherError::Config("no image host configured".to_string()))?;
        Ok(self.upload_to_imgbb(api_key, image).await?)
    }

    async fn create_post(&self, draft: &PostDraft) -> anyhow::Result<PublishedPost> {
        Ok(self.insert_post(draft).await?)
    }
}
