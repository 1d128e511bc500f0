use anyhow::Result;
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use groundswell::config::Config;
use groundswell::db::{self, queries, schema};
use groundswell::output::{report, terminal};
use groundswell::pipeline::{self, PipelineOptions};
use groundswell::providers::embeddings::HttpEmbeddingProvider;
use groundswell::providers::extractor::LlmTopicExtractor;
use groundswell::providers::retry::RateLimiter;
use groundswell::registry::TopicRegistry;
use groundswell::status;
use groundswell::trend::TrendMatrixBuilder;

/// Groundswell: topic trend analysis for app store reviews.
///
/// Consolidates LLM-extracted review topics into a stable taxonomy and
/// tracks how each topic trends day over day.
#[derive(Parser)]
#[command(name = "groundswell", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Process one date's review file into the taxonomy and daily stats
    Process {
        /// The date to process (YYYY-MM-DD)
        date: NaiveDate,

        /// Rebuild the date even if it was already processed
        #[arg(long)]
        force: bool,
    },

    /// Process every date in a range that has a review file
    Backfill {
        /// First date of the range (YYYY-MM-DD)
        from: NaiveDate,

        /// Last date of the range, inclusive (YYYY-MM-DD)
        to: NaiveDate,

        /// Rebuild dates that were already processed
        #[arg(long)]
        force: bool,
    },

    /// Show the trend matrix for a sliding window of processed dates
    Report {
        /// Window length in days (default: configured GROUNDSWELL_WINDOW_DAYS)
        #[arg(long)]
        days: Option<usize>,

        /// Window end date (default: latest processed date)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Also write CSV and Markdown reports to the report directory
        #[arg(long)]
        write: bool,
    },

    /// List borderline candidates waiting for human review
    ReviewQueue,

    /// Show system status (DB stats, taxonomy shape, processed dates)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("groundswell=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing Groundswell database...");
            let config = Config::load()?;
            let registry = open_registry(&config)?;
            let table_count = schema::table_count(registry.connection())?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nGroundswell is ready. Next step: set up your .env file");
            println!("  (see .env.example for required variables)");
            println!("\nThen run: cargo run -- process <date>");
        }

        Commands::Process { date, force } => {
            let config = Config::load()?;
            config.require_providers()?;
            let mut registry = open_registry(&config)?;
            let (extractor, embedder) = build_providers(&config)?;
            let rate_limiter = provider_rate_limiter();
            let options = pipeline_options(&config);

            let summary = pipeline::run(
                &mut registry,
                &extractor,
                &embedder,
                &rate_limiter,
                &options,
                &config.data_dir,
                date,
                force,
            )
            .await?;
            terminal::display_process_summary(date, &summary);
        }

        Commands::Backfill { from, to, force } => {
            if to < from {
                anyhow::bail!("Backfill range is empty: {to} is before {from}");
            }
            let config = Config::load()?;
            config.require_providers()?;
            let mut registry = open_registry(&config)?;
            let (extractor, embedder) = build_providers(&config)?;
            let rate_limiter = provider_rate_limiter();
            let options = pipeline_options(&config);

            let mut processed = 0usize;
            let mut skipped = 0usize;
            let mut date = from;
            while date <= to {
                if !pipeline::daily::review_file_path(&config.data_dir, date).exists() {
                    warn!(%date, "No review file, skipping");
                    skipped += 1;
                } else if queries::date_is_processed(registry.connection(), date)? && !force {
                    info!(%date, "Already processed, skipping (use --force to rebuild)");
                    skipped += 1;
                } else {
                    let summary = pipeline::run(
                        &mut registry,
                        &extractor,
                        &embedder,
                        &rate_limiter,
                        &options,
                        &config.data_dir,
                        date,
                        force,
                    )
                    .await?;
                    terminal::display_process_summary(date, &summary);
                    processed += 1;
                }
                date += Duration::days(1);
            }

            println!(
                "\n{}",
                format!("Backfill complete: {processed} date(s) processed, {skipped} skipped.")
                    .bold()
            );
        }

        Commands::Report { days, end, write } => {
            let config = Config::load()?;
            let registry = open_registry(&config)?;

            let end = match end {
                Some(end) => end,
                None => *queries::processed_dates(registry.connection())?
                    .last()
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "No processed dates yet. Run `groundswell process <date>` first."
                        )
                    })?,
            };

            let builder = TrendMatrixBuilder {
                window_days: days.unwrap_or(config.window_days),
                spike_factor: config.spike_factor,
            };
            let matrix = builder.build(&registry, end)?;
            terminal::display_trend_matrix(&matrix);

            if write {
                let (csv_path, md_path) = report::write_reports(&matrix, &config.report_dir, end)?;
                println!("Reports written:");
                println!("  {}", csv_path.display());
                println!("  {}", md_path.display());
            }
        }

        Commands::ReviewQueue => {
            let config = Config::load()?;
            let registry = open_registry(&config)?;
            let items = queries::get_pending_reviews(registry.connection())?;
            terminal::display_review_queue(&items, &registry);
        }

        Commands::Status => {
            let config = Config::load()?;
            if !std::path::Path::new(&config.db_path).exists() {
                status::show(None, &config.db_path)?;
            } else {
                let registry = open_registry(&config)?;
                status::show(Some(&registry), &config.db_path)?;
            }
        }
    }

    Ok(())
}

fn open_registry(config: &Config) -> Result<TopicRegistry> {
    let conn = db::open(&config.db_path)?;
    TopicRegistry::open(conn)
}

fn build_providers(config: &Config) -> Result<(LlmTopicExtractor, HttpEmbeddingProvider)> {
    let extractor = LlmTopicExtractor::new(
        &config.extractor_api_url,
        &config.extractor_api_key,
        &config.extractor_model,
    )?;
    let embedder = HttpEmbeddingProvider::new(
        &config.embedding_api_url,
        &config.embedding_api_key,
        &config.embedding_model,
    )?;
    Ok((extractor, embedder))
}

/// Shared throttle for both providers: 30 requests/minute with a small
/// inter-request delay, conservative enough for free-tier API limits.
fn provider_rate_limiter() -> RateLimiter {
    RateLimiter::new(30, 60, 250)
}

fn pipeline_options(config: &Config) -> PipelineOptions {
    PipelineOptions {
        matcher: config.matcher.clone(),
        per_review_cap: config.per_review_cap,
        chunk_size: config.chunk_size,
        concurrency: config.concurrency,
    }
}
