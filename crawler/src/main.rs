use anyhow::{anyhow, Result};
use clap::Parser;
use searchcore::{Config, CrawlPhase, Language, SearchEngine};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl the configured sites into the search index, respecting robots.txt")]
struct Cli {
    /// Path to a file with seed URLs or domains (one per line)
    #[arg(long)]
    seeds: String,
    /// Index database directory
    #[arg(long, default_value = "./index-db")]
    db: String,
    /// Number of crawl workers
    #[arg(long, default_value_t = 8)]
    workers: usize,
    /// Maximum link depth from a seed
    #[arg(long, default_value_t = 4)]
    max_depth: u32,
    /// Maximum pages fetched per domain
    #[arg(long, default_value_t = 500)]
    max_per_domain: usize,
    /// Minimum delay between fetches to the same domain, in milliseconds
    #[arg(long, default_value_t = 1000)]
    domain_delay_ms: u64,
    /// Global ceiling on fetches per minute
    #[arg(long, default_value_t = 300)]
    pages_per_minute: u32,
    /// Re-crawl documents older than this many hours
    #[arg(long, default_value_t = 24)]
    recrawl_hours: u64,
    /// Restrict the crawl to these domains (repeatable); empty means any
    #[arg(long)]
    allowed_domain: Vec<String>,
    /// Corpus language: english or swedish
    #[arg(long, default_value = "english")]
    language: String,
    /// User-Agent for page and robots.txt fetches
    #[arg(long, default_value = "sitesearch-bot/0.1 (+https://example.com/bot)")]
    user_agent: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let mut cfg = Config::default();
    cfg.language = match args.language.to_lowercase().as_str() {
        "swedish" | "sv" => Language::Swedish,
        _ => Language::English,
    };
    cfg.allowed_domains = args.allowed_domain;
    cfg.crawl.workers = args.workers;
    cfg.crawl.max_depth = args.max_depth;
    cfg.crawl.max_pages_per_domain = args.max_per_domain;
    cfg.crawl.per_domain_delay = Duration::from_millis(args.domain_delay_ms);
    cfg.crawl.pages_per_minute = args.pages_per_minute;
    cfg.crawl.recrawl_interval = Duration::from_secs(args.recrawl_hours * 3600);
    cfg.crawl.user_agent = args.user_agent;

    let mut seeds = Vec::new();
    for line in BufReader::new(File::open(&args.seeds)?).lines() {
        let line = line?.trim().to_string();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        seeds.push(line);
    }
    if seeds.is_empty() {
        return Err(anyhow!("no valid seeds in {}", args.seeds));
    }
    tracing::info!(
        seeds = seeds.len(),
        workers = cfg.crawl.workers,
        db = %args.db,
        "starting crawl"
    );

    let engine = SearchEngine::open(cfg, &args.db)?;
    engine.start_crawl(&seeds)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping crawl");
                engine.stop_crawl();
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                let status = engine.crawl_status();
                tracing::info!(
                    phase = ?status.phase,
                    fetched = status.pages_fetched,
                    indexed = status.pages_indexed,
                    unchanged = status.pages_unchanged,
                    skipped = status.pages_skipped,
                    failed = status.pages_failed,
                    frontier = status.frontier_len,
                    "crawl progress"
                );
                if status.phase == CrawlPhase::Idle {
                    break;
                }
            }
        }
    }

    engine.snapshot()?;
    let health = engine.health();
    let last_crawl = health
        .last_crawl_time
        .and_then(|ts| time::OffsetDateTime::from_unix_timestamp(ts as i64).ok())
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "never".to_string());
    tracing::info!(
        documents = health.document_count,
        terms = health.term_count,
        index_bytes = health.index_size_bytes,
        last_crawl = %last_crawl,
        "done"
    );
    Ok(())
}
