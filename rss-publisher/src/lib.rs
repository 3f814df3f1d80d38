pub mod types;
pub mod rss_utils;
pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod ledger;
pub mod dedup;
pub mod filter;
pub mod llm_adapter;
pub mod imaging;
pub mod blogger;
pub mod pipeline;
pub mod scheduler;
pub mod config;

pub use types::*;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use sources::RssFeedSource;
pub use ledger::{MemoryLedger, SqliteLedger};
pub use dedup::DedupCache;
pub use filter::{select_candidates, DuplicateStrictness, FilterPolicy};
pub use llm_adapter::OpenAiRewriter;
pub use imaging::{build_transformer, ImageStrategy};
pub use blogger::BloggerPublisher;
pub use pipeline::{Collaborators, ItemOutcome, PassReport, PipelineConfig, PublishPipeline, SkipStage};
pub use scheduler::{CacheScope, Scheduler};
pub use config::{AppConfig, Cli, ConfigError};
