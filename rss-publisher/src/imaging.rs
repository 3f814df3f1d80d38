use crate::types::{ImageAsset, ImageTransformer, PublisherError, Result};
use async_trait::async_trait;
use interfaces::baseline::IdentityTransformer;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const REMOVE_BG_URL: &str = "https://api.remove.bg/v1.0/removebg";

/// Which image edit runs between fetching and uploading the article image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStrategy {
    None,
    BackgroundRemoval { api_key: String, endpoint: String },
    HttpEdit { endpoint: String, api_key: Option<String> },
}

pub fn build_transformer(strategy: &ImageStrategy, timeout: Duration) -> Result<Arc<dyn ImageTransformer>> {
    let transformer: Arc<dyn ImageTransformer> = match strategy {
        ImageStrategy::None => Arc::new(IdentityTransformer),
        ImageStrategy::BackgroundRemoval { api_key, endpoint } => Arc::new(
            BackgroundRemovalTransformer::new(api_key.clone(), timeout)?.with_endpoint(endpoint.clone()),
        ),
        ImageStrategy::HttpEdit { endpoint, api_key } => {
            Arc::new(HttpEditTransformer::new(endpoint.clone(), api_key.clone(), timeout)?)
        }
    };
    Ok(transformer)
}

/// remove.bg style service: multipart upload in, PNG cut-out back.
pub struct BackgroundRemovalTransformer {
    api_key: String,
    endpoint: String,
    http: reqwest::Client,
}

impl BackgroundRemovalTransformer {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key,
            endpoint: REMOVE_BG_URL.to_string(),
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    async fn remove_background(&self, image: &ImageAsset) -> Result<ImageAsset> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(format!("source.{}", image.file_extension()))
            .mime_str(&image.content_type)?;
        let form = Form::new().part("image_file", part).text("size", "auto");

        debug!(endpoint = %self.endpoint, bytes = image.bytes.len(), "Requesting background removal");

        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        edited_image(response, image, "image/png").await
    }
}

#[async_trait]
impl ImageTransformer for BackgroundRemovalTransformer {
    fn transformer_name(&self) -> String {
        "background-removal".to_string()
    }

    async fn transform(&self, image: &ImageAsset) -> anyhow::Result<ImageAsset> {
        Ok(self.remove_background(image).await?)
    }
}

/// Any endpoint that takes raw image bytes and answers with the edited image.
pub struct HttpEditTransformer {
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpEditTransformer {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint,
            api_key,
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn edit(&self, image: &ImageAsset) -> Result<ImageAsset> {
        let content_type = HeaderValue::from_str(&image.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, content_type)
            .body(image.bytes.clone());
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key));
        }

        debug!(endpoint = %self.endpoint, bytes = image.bytes.len(), "Requesting image edit");

        let response = request.send().await?;
        edited_image(response, image, &image.content_type).await
    }
}

#[async_trait]
impl ImageTransformer for HttpEditTransformer {
    fn transformer_name(&self) -> String {
        "http-edit".to_string()
    }

    async fn transform(&self, image: &ImageAsset) -> anyhow::Result<ImageAsset> {
        Ok(self.edit(image).await?)
    }
}

async fn edited_image(response: Response, original: &ImageAsset, default_type: &str) -> Result<ImageAsset> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(PublisherError::General(format!(
            "image service error ({}): {}",
            status, error_text
        )));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
        .unwrap_or_else(|| default_type.to_string());
    if !content_type.starts_with("image/") {
        return Err(PublisherError::General(format!(
            "image service answered with {} instead of an image",
            content_type
        )));
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Err(PublisherError::General("image service returned no bytes".to_string()));
    }

    Ok(ImageAsset {
        source_url: original.source_url.clone(),
        bytes: bytes.to_vec(),
        content_type,
    })
}
