use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use pr_metrics::fetch::{FetchOptions, Fetcher};
use pr_metrics::github::{default_cache_path, FetchError, GithubClient, PageCache};
use pr_metrics::output::{render_bucket_stats, render_pull_requests, write_report};
use pr_metrics::stats::{aggregate, Granularity};
use pr_metrics::store::PullRequestStore;

const EXIT_SUCCESS: i32 = 0;
const EXIT_AUTH: i32 = 1;
const EXIT_FETCH: i32 = 2;
const EXIT_CONFIG: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "pr-metrics")]
#[command(about = "Mirror a repository's pull-request history and derive daily/weekly stats", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository owner
    #[arg(long)]
    owner: String,

    /// Repository name
    #[arg(long)]
    repo: String,

    /// Only fetch records updated at or after this instant (RFC 3339)
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Directory holding the page cache (defaults to the platform cache dir)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Skip the page cache entirely and refetch everything
    #[arg(long)]
    no_cache: bool,

    /// Directory the CSV report files are written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Maximum total rate-limit wait per run, in minutes
    #[arg(long, default_value_t = 30)]
    max_rate_limit_wait: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn fetch_exit_code(err: &FetchError) -> i32 {
    match err {
        FetchError::Auth(_) => EXIT_AUTH,
        _ => EXIT_FETCH,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let start_time = Instant::now();

    let token = match std::env::var("ACCESS_TOKEN").or_else(|_| std::env::var("GITHUB_TOKEN")) {
        Ok(t) => t,
        Err(_) => {
            eprintln!("Missing ACCESS_TOKEN (or GITHUB_TOKEN) environment variable");
            std::process::exit(EXIT_AUTH);
        }
    };

    let client = match GithubClient::new(&token) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create GitHub client: {}", e);
            std::process::exit(EXIT_FETCH);
        }
    };

    let cache_path = cli.cache_dir.unwrap_or_else(default_cache_path);
    let cache = PageCache::new(cache_path.clone(), !cli.no_cache);
    if cli.verbose {
        let status = if cli.no_cache {
            "disabled (--no-cache)".to_string()
        } else {
            cache_path.display().to_string()
        };
        eprintln!("Cache: {}", status);
    }

    let mut opts = FetchOptions::new(&cli.owner, &cli.repo);
    opts.since = cli.since;
    opts.max_rate_limit_wait = std::time::Duration::from_secs(cli.max_rate_limit_wait * 60);
    opts.verbose = cli.verbose;

    let mut store = PullRequestStore::new();
    let fetcher = Fetcher::new(&client, &cache, &opts);
    if let Err(e) = fetcher.run(&mut store).await {
        eprintln!("Fetch failed: {}", e);
        std::process::exit(fetch_exit_code(&e));
    }

    if cli.verbose {
        eprintln!(
            "Fetched {} PRs for {}/{} in {:?}",
            store.len(),
            cli.owner,
            cli.repo,
            start_time.elapsed()
        );
    }

    let records: Vec<_> = store.all().collect();
    let daily = aggregate(records.iter().copied(), Granularity::Day);
    let weekly = aggregate(records.iter().copied(), Granularity::Week);

    let reports = [
        ("pull_requests.csv", render_pull_requests(records.iter().copied())),
        ("daily.csv", render_bucket_stats(&daily)),
        ("weekly.csv", render_bucket_stats(&weekly)),
    ];
    for (name, content) in &reports {
        let path = cli.out_dir.join(name);
        if let Err(e) = write_report(&path, content) {
            eprintln!("Report error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
        if cli.verbose {
            eprintln!("Wrote {}", path.display());
        }
    }

    std::process::exit(EXIT_SUCCESS);
}
