use clap::Parser;
use interfaces::baseline::PassthroughRewriter;
use interfaces::{PostLedger, TextRewriter};
use rss_publisher::config::{AppConfig, RewriterSettings};
use rss_publisher::{
    build_transformer, BloggerPublisher, Cli, Collaborators, Fetcher, OpenAiRewriter, PublishPipeline, RssFeedSource,
    Scheduler, SqliteLedger,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rss_publisher=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match Cli::parse().validate() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting rss-publisher for {}", config.feed_url);
    info!("Ledger: {}", config.database.display());

    let ledger = Arc::new(SqliteLedger::open(&config.database).await?);
    info!("Ledger holds {} published posts", ledger.count().await?);
    if let Some(last) = ledger.recent(1).await?.first() {
        info!("Last published: \"{}\" at {}", last.title, last.posted_at);
    }

    let call_timeout = Duration::from_secs(config.fetch.timeout_seconds);
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);

    let rewriter: Arc<dyn TextRewriter> = match &config.rewriter {
        RewriterSettings::OpenAi {
            api_key,
            model,
            base_url,
        } => {
            let mut rewriter = OpenAiRewriter::new(api_key.as_str(), model.as_str(), call_timeout)?;
            if let Some(url) = base_url {
                rewriter = rewriter.with_base_url(url.as_str());
            }
            Arc::new(rewriter)
        }
        RewriterSettings::Passthrough => Arc::new(PassthroughRewriter),
    };

    let publisher = BloggerPublisher::new(
        config.blogger.blog_id.clone(),
        config.blogger.access_token.clone(),
        call_timeout,
    )?
    .with_image_host(config.blogger.imgbb_api_key.clone())
    .as_draft(config.blogger.as_draft);

    let collaborators = Collaborators {
        feed: Arc::new(RssFeedSource::new(config.feed_url.clone(), fetcher.clone())),
        fetcher,
        rewriter,
        transformer: build_transformer(&config.image_strategy, call_timeout)?,
        publisher: Arc::new(publisher),
    };
    info!(
        rewriter = %collaborators.rewriter.rewriter_name(),
        transformer = %collaborators.transformer.transformer_name(),
        "Collaborators ready"
    );

    let pipeline = Arc::new(PublishPipeline::new(
        collaborators,
        ledger.clone(),
        config.pipeline.clone(),
    ));
    let scheduler = Scheduler::new(pipeline, &config.schedule, config.cache_scope)?;

    if config.once {
        if let Some(report) = scheduler.run_once().await {
            info!(
                "Single pass done: {} committed, {} skipped, {} orphaned, {} duplicates",
                report.committed(),
                report.skipped(),
                report.orphaned(),
                report.already_recorded()
            );
        }
    } else {
        scheduler.run_forever().await?;
    }

    ledger.close().await;
    Ok(())
}
