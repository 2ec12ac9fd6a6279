//! # Subject Monitor
//!
//! A scheduled news monitoring pipeline. Each run fetches recent articles
//! for a subject's keywords from Google News RSS, deduplicates them,
//! classifies them in batches through an LLM with a subject-specific
//! prompt, writes an HTML report plus a JSON run log, and delivers a
//! summary to Telegram.
//!
//! ## Usage
//!
//! ```sh
//! subject_monitor --subject rezoning
//! subject_monitor --all-subjects
//! subject_monitor --subject rezoning --dry-run
//! ```
//!
//! ## Architecture
//!
//! The pipeline moves strictly forward:
//! 1. **Fetch**: one RSS query per keyword, merged and deduplicated
//! 2. **Classify**: fixed-size batches through the LLM under retry;
//!    a batch that exhausts its retries is quarantined, not dropped
//! 3. **Aggregate**: all verdicts folded into one run result
//! 4. **Output**: HTML report, kept-article extract, JSON run log
//! 5. **Deliver**: best-effort Telegram summary and report upload

use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod api;
mod classify;
mod cli;
mod dedupe;
mod deliver;
mod error;
mod fetch;
mod models;
mod outputs;
mod pipeline;
mod sources;
mod subjects;
mod utils;

use api::AnthropicClient;
use cli::Cli;
use deliver::TelegramDelivery;
use error::MonitorError;
use models::RunResult;
use pipeline::run_subject;
use sources::google_news::GoogleNewsSource;
use subjects::{Subject, list_subjects, load_settings, load_subject};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "info" })
    });
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "subject_monitor starting up");

    let root = PathBuf::from(&args.data_dir);

    if args.list_subjects {
        let listed = list_subjects(&root)?;
        if listed.is_empty() {
            println!("No subjects configured under {}/subjects", root.display());
        } else {
            println!("Available subjects:");
            for summary in listed {
                if summary.description.is_empty() {
                    println!("  {} ({})", summary.slug, summary.name);
                } else {
                    println!("  {} ({}) — {}", summary.slug, summary.name, summary.description);
                }
            }
        }
        return Ok(());
    }

    let config_path = if Path::new(&args.config).is_absolute() {
        PathBuf::from(&args.config)
    } else {
        root.join(&args.config)
    };
    let global = load_settings(&config_path)?;

    let slugs: Vec<String> = if let Some(slug) = &args.subject {
        vec![slug.clone()]
    } else if args.all_subjects {
        list_subjects(&root)?.into_iter().map(|s| s.slug).collect()
    } else {
        return Err(Box::new(MonitorError::Config(
            "nothing to do: pass --subject <slug>, --all-subjects, or --list-subjects".to_string(),
        )) as Box<dyn Error>);
    };
    if slugs.is_empty() {
        return Err(Box::new(MonitorError::Config(format!(
            "no subjects configured under {}/subjects",
            root.display()
        ))));
    }

    if args.test_delivery {
        let slug = slugs.first().map(String::as_str).unwrap_or_default();
        let subject = load_subject(&root, slug, &global)?;
        let telegram = build_delivery(&args, &subject)?.ok_or_else(|| {
            MonitorError::Config(
                "delivery test needs TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID".to_string(),
            )
        })?;
        telegram.send_test().await?;
        println!("Delivery test sent for '{}'", subject.slug);
        return Ok(());
    }

    let source = GoogleNewsSource::new()?;
    let mut hard_failure = false;

    for slug in &slugs {
        let mut subject = match load_subject(&root, slug, &global) {
            Ok(subject) => subject,
            Err(e) => {
                error!(subject = %slug, error = %e, "Subject configuration fault");
                hard_failure = true;
                continue;
            }
        };
        if let Some(days) = args.days {
            subject.settings.days_lookback = days;
        }

        // The API key is only required when classification will actually run.
        let api_key = match (&args.anthropic_api_key, args.dry_run) {
            (Some(key), _) => key.clone(),
            (None, true) => String::new(),
            (None, false) => {
                error!(subject = %slug, "ANTHROPIC_API_KEY is not set");
                hard_failure = true;
                continue;
            }
        };
        let client = AnthropicClient::new(&args.anthropic_api_base, &api_key, &subject.settings.model)?;

        let telegram = if args.dry_run {
            None
        } else {
            build_delivery(&args, &subject)?
        };

        match run_subject(&root, &subject, &source, &client, telegram.as_ref(), args.dry_run).await
        {
            Ok(result) => {
                print_summary(&subject, &result);
                if result.all_batches_quarantined() {
                    error!(subject = %slug, "Every batch was quarantined");
                    hard_failure = true;
                }
            }
            Err(e) => {
                error!(subject = %slug, error = %e, "Run aborted");
                hard_failure = true;
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(?elapsed, subjects = slugs.len(), "Execution complete");

    if hard_failure {
        std::process::exit(1);
    }
    Ok(())
}

/// Delivery is active only when the subject enables it and both Telegram
/// credentials are present.
fn build_delivery(args: &Cli, subject: &Subject) -> Result<Option<TelegramDelivery>, MonitorError> {
    if !subject.settings.telegram_enabled {
        return Ok(None);
    }
    match (&args.telegram_bot_token, &args.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            Ok(Some(TelegramDelivery::new(token, chat_id, subject)?))
        }
        _ => {
            warn!(subject = %subject.slug, "Telegram credentials not set; delivery disabled");
            Ok(None)
        }
    }
}

fn print_summary(subject: &Subject, result: &RunResult) {
    println!("\n{} {} — {}", subject.emoji, subject.name, result.date);
    println!(
        "  fetched {} · classified {} · kept {} · killed {}",
        result.articles_fetched, result.articles_classified, result.kept_count, result.killed_count
    );
    if result.batches_quarantined > 0 {
        println!(
            "  quarantined {}/{} batches",
            result.batches_quarantined, result.batches_total
        );
    }
    println!(
        "  tokens: {} in / {} out ({} cache read) · {:.1}s",
        result.token_usage.input_tokens,
        result.token_usage.output_tokens,
        result.token_usage.cache_read_input_tokens,
        result.elapsed_seconds
    );
    for error in &result.errors {
        println!("  warning: {error}");
    }
}
