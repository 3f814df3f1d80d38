use crate::filter::DuplicateStrictness;
use crate::imaging::{ImageStrategy, REMOVE_BG_URL};
use crate::pipeline::PipelineConfig;
use crate::rss_utils::url::is_valid_feed_url;
use crate::scheduler::{parse_schedule, CacheScope};
use crate::types::FetchConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageStrategyArg {
    None,
    BackgroundRemoval,
    HttpEdit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DuplicateCheck {
    Exact,
    FuzzyTitle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RewriterKind {
    Openai,
    Passthrough,
}

#[derive(Debug, Error)]
#[error("invalid configuration:\n  - {}", .problems.join("\n  - "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

/// Polls one RSS feed, rewrites new stories and publishes them to Blogger.
#[derive(Parser, Debug, Clone)]
#[command(name = "rss-publisher", version, about)]
pub struct Cli {
    #[arg(long, env = "FEED_URL")]
    pub feed_url: Option<String>,

    /// Cron expression, 5 fields or 6/7 with seconds
    #[arg(long, env = "POLL_SCHEDULE", default_value = "*/30 * * * *")]
    pub schedule: String,

    #[arg(long, env = "MAX_ITEMS_PER_RUN", default_value_t = 1)]
    pub max_items: usize,

    /// Run a single pass, publish at most one item and exit
    #[arg(long, env = "RUN_ONCE")]
    pub once: bool,

    #[arg(long, env = "LEDGER_PATH", default_value = "posted.db")]
    pub database: PathBuf,

    #[arg(long, env = "USER_AGENT", default_value = "rss-publisher/0.1")]
    pub user_agent: String,

    #[arg(long, env = "IMAGE_STRATEGY", value_enum, default_value_t = ImageStrategyArg::None)]
    pub image_strategy: ImageStrategyArg,

    #[arg(long, env = "DUPLICATE_CHECK", value_enum, default_value_t = DuplicateCheck::Exact)]
    pub duplicate_check: DuplicateCheck,

    #[arg(long, env = "FUZZY_TITLE_WORDS", default_value_t = 6)]
    pub fuzzy_title_words: usize,

    #[arg(long, env = "DEDUP_CACHE_SCOPE", value_enum, default_value_t = CacheScope::Process)]
    pub cache_scope: CacheScope,

    #[arg(long, env = "PAGE_IMAGE_FALLBACK", default_value_t = true, action = clap::ArgAction::Set)]
    pub page_image_fallback: bool,

    /// Publish text-only posts when no image can be found
    #[arg(long, env = "ALLOW_MISSING_IMAGE")]
    pub allow_missing_image: bool,

    #[arg(long, env = "ITEM_DELAY_SECS", default_value_t = 10)]
    pub item_delay_secs: u64,

    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    #[arg(long, env = "REWRITER", value_enum, default_value_t = RewriterKind::Openai)]
    pub rewriter: RewriterKind,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    #[arg(long, env = "BLOGGER_BLOG_ID")]
    pub blogger_blog_id: Option<String>,

    #[arg(long, env = "BLOGGER_ACCESS_TOKEN", hide_env_values = true)]
    pub blogger_access_token: Option<String>,

    /// Create posts as drafts instead of publishing them live
    #[arg(long, env = "BLOGGER_AS_DRAFT")]
    pub draft: bool,

    #[arg(long, env = "IMGBB_API_KEY", hide_env_values = true)]
    pub imgbb_api_key: Option<String>,

    #[arg(long, env = "REMOVE_BG_API_KEY", hide_env_values = true)]
    pub remove_bg_api_key: Option<String>,

    #[arg(long, env = "REMOVE_BG_URL", default_value = REMOVE_BG_URL)]
    pub remove_bg_url: String,

    #[arg(long, env = "IMAGE_EDIT_URL")]
    pub image_edit_url: Option<String>,

    #[arg(long, env = "IMAGE_EDIT_API_KEY", hide_env_values = true)]
    pub image_edit_api_key: Option<String>,

    /// Comma-separated labels used when neither the rewriter nor the feed supplies any
    #[arg(long, env = "DEFAULT_LABELS", value_delimiter = ',')]
    pub default_labels: Vec<String>,
}

/// Everything `main` needs, checked once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed_url: String,
    pub schedule: String,
    pub once: bool,
    pub database: PathBuf,
    pub cache_scope: CacheScope,
    pub fetch: FetchConfig,
    pub pipeline: PipelineConfig,
    pub image_strategy: ImageStrategy,
    pub rewriter: RewriterSettings,
    pub blogger: BloggerSettings,
}

#[derive(Debug, Clone)]
pub enum RewriterSettings {
    OpenAi {
        api_key: String,
        model: String,
        base_url: Option<String>,
    },
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct BloggerSettings {
    pub blog_id: String,
    pub access_token: String,
    pub imgbb_api_key: Option<String>,
    pub as_draft: bool,
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl Cli {
    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<AppConfig, ConfigError> {
        let mut problems = Vec::new();
        let mut require = |value: &Option<String>, name: &str| -> String {
            present(value).unwrap_or_else(|| {
                problems.push(format!("{} is required", name));
                String::new()
            })
        };

        let feed_url = require(&self.feed_url, "FEED_URL");
        let blog_id = require(&self.blogger_blog_id, "BLOGGER_BLOG_ID");
        let access_token = require(&self.blogger_access_token, "BLOGGER_ACCESS_TOKEN");

        let rewriter = match self.rewriter {
            RewriterKind::Openai => RewriterSettings::OpenAi {
                api_key: require(&self.openai_api_key, "OPENAI_API_KEY (REWRITER=openai)"),
                model: self.openai_model.clone(),
                base_url: present(&self.openai_base_url),
            },
            RewriterKind::Passthrough => RewriterSettings::Passthrough,
        };

        let image_strategy = match self.image_strategy {
            ImageStrategyArg::None => ImageStrategy::None,
            ImageStrategyArg::BackgroundRemoval => ImageStrategy::BackgroundRemoval {
                api_key: require(&self.remove_bg_api_key, "REMOVE_BG_API_KEY (IMAGE_STRATEGY=background-removal)"),
                endpoint: self.remove_bg_url.clone(),
            },
            ImageStrategyArg::HttpEdit => ImageStrategy::HttpEdit {
                endpoint: require(&self.image_edit_url, "IMAGE_EDIT_URL (IMAGE_STRATEGY=http-edit)"),
                api_key: present(&self.image_edit_api_key),
            },
        };

        if !feed_url.is_empty() && !is_valid_feed_url(&feed_url) {
            problems.push(format!("FEED_URL is not an http(s) URL: {}", feed_url));
        }
        if let Err(e) = parse_schedule(&self.schedule) {
            problems.push(e.to_string());
        }
        if self.max_items == 0 {
            problems.push("MAX_ITEMS_PER_RUN must be at least 1".to_string());
        }
        if self.duplicate_check == DuplicateCheck::FuzzyTitle && self.fuzzy_title_words == 0 {
            problems.push("FUZZY_TITLE_WORDS must be at least 1".to_string());
        }
        if self.timeout_secs == 0 {
            problems.push("CALL_TIMEOUT_SECS must be at least 1".to_string());
        }

        if !problems.is_empty() {
            return Err(ConfigError { problems });
        }

        let strictness = match self.duplicate_check {
            DuplicateCheck::Exact => DuplicateStrictness::Exact,
            DuplicateCheck::FuzzyTitle => DuplicateStrictness::FuzzyTitle {
                words: self.fuzzy_title_words,
            },
        };

        let fetch = FetchConfig {
            user_agent: self.user_agent.clone(),
            timeout_seconds: self.timeout_secs,
            ..FetchConfig::default()
        };

        let pipeline = PipelineConfig {
            max_items: self.max_items,
            strictness,
            require_image: !self.allow_missing_image,
            page_image_fallback: self.page_image_fallback,
            item_delay: Duration::from_secs(self.item_delay_secs),
            call_timeout: Duration::from_secs(self.timeout_secs),
            feed_timeout: fetch.feed_fetch_budget(),
            stop_after_first_commit: self.once,
            default_labels: self
                .default_labels
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
        };

        Ok(AppConfig {
            feed_url,
            schedule: self.schedule.clone(),
            once: self.once,
            database: self.database.clone(),
            cache_scope: self.cache_scope,
            fetch,
            pipeline,
            image_strategy,
            rewriter,
            blogger: BloggerSettings {
                blog_id,
                access_token,
                imgbb_api_key: present(&self.imgbb_api_key),
                as_draft: self.draft,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["rss-publisher"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    const REQUIRED: [&str; 8] = [
        "--feed-url",
        "https://news.example.com/rss",
        "--blogger-blog-id",
        "123",
        "--blogger-access-token",
        "token",
        "--openai-api-key",
        "sk-test",
    ];

    #[test]
    fn reports_every_missing_value() {
        let cli = Cli {
            feed_url: None,
            blogger_blog_id: None,
            blogger_access_token: Some("  ".to_string()),
            openai_api_key: None,
            ..parse(&REQUIRED)
        };
        let err = cli.validate().unwrap_err();
        assert_eq!(err.problems.len(), 4);
        let text = err.to_string();
        for name in ["FEED_URL", "BLOGGER_BLOG_ID", "BLOGGER_ACCESS_TOKEN", "OPENAI_API_KEY"] {
            assert!(text.contains(name), "{} missing from {}", name, text);
        }
    }

    #[test]
    fn strategy_specific_requirements() {
        let cli = Cli {
            image_strategy: ImageStrategyArg::HttpEdit,
            image_edit_url: None,
            rewriter: RewriterKind::Passthrough,
            openai_api_key: None,
            ..parse(&REQUIRED)
        };
        let err = cli.validate().unwrap_err();
        assert_eq!(err.problems.len(), 1);
        assert!(err.problems[0].contains("IMAGE_EDIT_URL"));
    }

    #[test]
    fn rejects_bad_values() {
        let cli = Cli {
            feed_url: Some("ftp://news.example.com/rss".to_string()),
            schedule: "whenever".to_string(),
            max_items: 0,
            ..parse(&REQUIRED)
        };
        assert_eq!(cli.validate().unwrap_err().problems.len(), 3);
    }

    #[test]
    fn builds_pipeline_settings() {
        let mut args = REQUIRED.to_vec();
        args.extend([
            "--once",
            "--max-items",
            "3",
            "--duplicate-check",
            "fuzzy-title",
            "--fuzzy-title-words",
            "4",
            "--page-image-fallback",
            "false",
            "--default-labels",
            "News, Tech,",
            "--item-delay-secs",
            "2",
        ]);
        let config = parse(&args).validate().unwrap();

        assert!(config.once);
        assert!(config.pipeline.stop_after_first_commit);
        assert_eq!(config.pipeline.max_items, 3);
        assert_eq!(config.pipeline.strictness, DuplicateStrictness::FuzzyTitle { words: 4 });
        assert!(!config.pipeline.page_image_fallback);
        assert!(config.pipeline.require_image);
        assert!(config.pipeline.filter_policy().require_inline_image);
        assert_eq!(config.pipeline.default_labels, vec!["News", "Tech"]);
        assert_eq!(config.pipeline.item_delay, Duration::from_secs(2));
        assert_eq!(config.image_strategy, ImageStrategy::None);
        assert!(matches!(config.rewriter, RewriterSettings::OpenAi { .. }));
    }

    #[test]
    fn feed_fetch_outlasts_its_retries() {
        let config = parse(&REQUIRED).validate().unwrap();

        assert_eq!(config.pipeline.feed_timeout, config.fetch.feed_fetch_budget());
        assert!(config.pipeline.feed_timeout > config.pipeline.call_timeout * (config.fetch.max_retries + 1));
    }
}
