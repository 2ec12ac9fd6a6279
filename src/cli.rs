//! Command-line interface definitions.
//!
//! All options can be provided via command-line flags; credentials come
//! from environment variables.

use clap::Parser;

/// Command-line arguments for the subject monitor.
///
/// # Examples
///
/// ```sh
/// # Run one subject
/// subject_monitor --subject rezoning
///
/// # Run every configured subject
/// subject_monitor --all-subjects
///
/// # See what would be classified without spending tokens
/// subject_monitor --subject rezoning --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Subject to run (directory name under subjects/)
    #[arg(short, long)]
    pub subject: Option<String>,

    /// Run every configured subject sequentially
    #[arg(long, conflicts_with = "subject")]
    pub all_subjects: bool,

    /// List available subjects and exit
    #[arg(long)]
    pub list_subjects: bool,

    /// Fetch and deduplicate only; print the articles and write no files
    #[arg(long)]
    pub dry_run: bool,

    /// Override the lookback window in days
    #[arg(long)]
    pub days: Option<u32>,

    /// Send a Telegram probe message for the subject and exit
    #[arg(long)]
    pub test_delivery: bool,

    /// Path to the global config file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: String,

    /// Root directory holding subjects/, reports/, and logs/
    #[arg(long, default_value = ".")]
    pub data_dir: String,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Anthropic API base URL
    #[arg(
        long,
        env = "ANTHROPIC_API_BASE",
        default_value = "https://api.anthropic.com"
    )]
    pub anthropic_api_base: String,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat ID to deliver to
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,
}
