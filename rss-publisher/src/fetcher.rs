use crate::types::{FeedFetch, FetchConfig, ImageAsset, PublisherError, Result};
use async_trait::async_trait;
use backoff::{exponential::ExponentialBackoff, future::retry_notify};
use interfaces::defs::ContentFetcher;
use reqwest::{header, Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Fetches a feed document with conditional headers. Network failures, `429` and `5xx`
    /// are retried with exponential backoff, up to `max_retries` times.
    pub async fn fetch_feed(&self, url: &str, etag: Option<&str>, last_modified: Option<&str>) -> Result<FeedFetch> {
        debug!("Fetching feed: {}", url);

        self.apply_rate_limit(url).await?;

        let delay = Duration::from_secs(self.config.retry_delay_seconds);
        let policy: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 32,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let max_retries = self.config.max_retries;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let fetched = retry_notify(
            policy,
            move || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    self.request_feed(url, etag, last_modified).await.map_err(|e| {
                        if attempt < max_retries && is_transient(&e) {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: PublisherError, wait: Duration| {
                warn!("Feed fetch failed for {}: {}, retrying in {:?}", url, e, wait);
            },
        )
        .await;

        match &fetched {
            Ok(FeedFetch::NotModified) => debug!("Feed not modified: {}", url),
            Ok(FeedFetch::Fetched { content, .. }) => {
                info!("Successfully fetched feed: {} ({} bytes)", url, content.len())
            }
            Err(e) => error!(
                "Failed to fetch feed {} after {} attempts: {}",
                url,
                attempts.load(Ordering::SeqCst),
                e
            ),
        }
        fetched
    }

    /// One conditional GET of the feed.
    async fn request_feed(&self, url: &str, etag: Option<&str>, last_modified: Option<&str>) -> Result<FeedFetch> {
        let mut request = self.client.get(url);

        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }

        if let Some(last_modified) = last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FeedFetch::NotModified);
        }
        if !status.is_success() {
            return Err(PublisherError::Status { status: status.as_u16() });
        }

        let max_bytes = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_bytes {
                return Err(PublisherError::TooLarge {
                    size_mb: content_length as usize / (1024 * 1024),
                });
            }
        }

        let etag = header_string(&response, header::ETAG);
        let last_modified = header_string(&response, header::LAST_MODIFIED);
        let content = response.text().await?;
        if content.len() > max_bytes {
            return Err(PublisherError::TooLarge {
                size_mb: content.len() / (1024 * 1024),
            });
        }

        Ok(FeedFetch::Fetched {
            content,
            etag,
            last_modified,
        })
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();

        let now = Instant::now();
        let min_interval = Duration::from_secs(1); // Minimum 1 second between requests to same host

        {
            let mut rate_limiter = self.rate_limiter.write().await;

            if let Some(last_request) = rate_limiter.get(&host) {
                let elapsed = now.duration_since(*last_request);
                if elapsed < min_interval {
                    let wait_time = min_interval - elapsed;
                    debug!("Rate limiting {}: waiting {:?}", host, wait_time);
                    tokio::time::sleep(wait_time).await;
                }
            }

            rate_limiter.insert(host, Instant::now());
        }

        Ok(())
    }

    async fn get_checked(&self, url: &str) -> Result<Response> {
        self.apply_rate_limit(url).await?;

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(PublisherError::Status {
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }

    pub async fn fetch_full_content(&self, url: &str) -> Result<String> {
        debug!("Fetching full content from: {}", url);
        let response = self.get_checked(url).await?;
        Ok(response.text().await?)
    }

    pub async fn fetch_image_asset(&self, url: &str) -> Result<ImageAsset> {
        debug!("Fetching image from: {}", url);
        let response = self.get_checked(url).await?;

        let max_bytes = self.config.max_image_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_bytes {
                return Err(PublisherError::TooLarge {
                    size_mb: content_length as usize / (1024 * 1024),
                });
            }
        }

        let content_type = header_string(&response, header::CONTENT_TYPE)
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
            .unwrap_or_default();
        if !content_type.is_empty() && !content_type.starts_with("image/") {
            return Err(PublisherError::General(format!(
                "{} is not an image ({})",
                url, content_type
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(PublisherError::General(format!("{} returned an empty image", url)));
        }
        if bytes.len() > max_bytes {
            return Err(PublisherError::TooLarge {
                size_mb: bytes.len() / (1024 * 1024),
            });
        }

        Ok(ImageAsset {
            source_url: url.to_string(),
            bytes: bytes.to_vec(),
            content_type: if content_type.is_empty() {
                "image/jpeg".to_string()
            } else {
                content_type
            },
        })
    }
}

/// Failures worth another attempt: the network, rate limiting and server errors.
fn is_transient(error: &PublisherError) -> bool {
    match error {
        PublisherError::Http(e) => !e.is_decode(),
        PublisherError::Status { status } => *status == 429 || *status >= 500,
        _ => false,
    }
}

fn header_string(response: &Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[async_trait]
impl ContentFetcher for Fetcher {
    async fn fetch_page(&self, url: &str) -> anyhow::Result<String> {
        Ok(self.fetch_full_content(url).await?)
    }

    async fn fetch_image(&self, url: &str) -> anyhow::Result<ImageAsset> {
        Ok(self.fetch_image_asset(url).await?)
    }
}
