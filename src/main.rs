use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use sitescout::{
    analysis, BrowserFetcher, CrawlEngine, CrawlOptions, HttpFetcher, MemoryStore, NoopObserver,
    PageFetcher,
};

/// Crawl a site and print its canonical sitemap tree and structural issues.
#[derive(Debug, Parser)]
#[command(name = "sitescout")]
struct Cli {
    /// Seed URL or bare domain.
    seed: String,
    #[arg(long, default_value_t = 3)]
    max_depth: u32,
    #[arg(long, default_value_t = 500)]
    max_pages: u32,
    #[arg(long)]
    use_sitemap: bool,
    #[arg(long)]
    check_redirect_duplicates: bool,
    #[arg(long, default_value_t = 6)]
    batch_size: usize,
    /// Fetch with plain HTTP instead of the headless browser.
    #[arg(long)]
    no_browser: bool,
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let options = CrawlOptions {
        max_depth: cli.max_depth,
        max_pages: cli.max_pages,
        use_sitemap: cli.use_sitemap,
        check_redirect_duplicates: cli.check_redirect_duplicates,
        batch_size: cli.batch_size,
        ..CrawlOptions::default()
    };

    let fetcher: Arc<dyn PageFetcher> = if cli.no_browser {
        Arc::new(HttpFetcher::new(&options.user_agent))
    } else {
        match BrowserFetcher::launch(&options.user_agent).await {
            Ok(browser) => Arc::new(browser),
            Err(e) => {
                tracing::error!(error = %e, "browser launch failed");
                std::process::exit(1);
            }
        }
    };

    let store = Arc::new(MemoryStore::new());
    let engine = CrawlEngine::new(
        fetcher,
        store.clone(),
        Arc::new(NoopObserver),
        options,
    );

    // Ctrl-C deletes the job, which the crawl loop picks up as its
    // cooperative cancellation signal.
    let job_id = "cli";
    {
        let store = store.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping crawl");
                store.delete_job(job_id);
            }
        });
    }

    let report = engine.run(job_id, &cli.seed).await;

    println!("{}", analysis::tree::render_text(&report.tree));

    if report.issues.issues.is_empty() {
        println!("no structural issues detected");
    } else {
        println!("issues ({}):", report.issues.issues.len());
        for issue in &report.issues.issues {
            println!("  {:?}: {} — {}", issue.kind, issue.subject, issue.detail);
        }
    }

    println!(
        "\n{}",
        serde_json::to_string_pretty(&report.outcome.stats).expect("stats serialize")
    );
    if let Some(critical) = &report.outcome.report.critical_error {
        eprintln!("crawl failed: {critical}");
        std::process::exit(1);
    }
}
