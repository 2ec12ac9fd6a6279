//! Subject configuration loading.
//!
//! A subject is a named topical filter domain. Everything that
//! distinguishes one subject from another lives on disk:
//!
//! ```text
//! config.yaml                  # global defaults
//! subjects/
//! ├── _template/               # scaffolding, skipped by listing
//! └── rezoning/
//!     ├── subject.yaml         # keywords, display metadata, overrides
//!     └── prompt.md            # the classification system prompt
//! ```
//!
//! The pipeline core receives a [`Subject`] and never branches on its
//! identity; adding a subject is a pure configuration change.
//!
//! A missing subject directory, `subject.yaml`, or `prompt.md` is a fatal
//! configuration fault: the run for that subject aborts before any network
//! call is made.

use crate::error::{MonitorError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Pipeline settings, resolved from built-in defaults, `config.yaml`, and
/// per-subject overrides (in that order). Read-only after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model identifier passed to the classification service.
    pub model: String,
    /// Attempt cap for retryable collaborator calls.
    pub max_retries: u32,
    /// Base delay in seconds before the first retry; doubles per attempt.
    pub retry_delay_seconds: u64,
    /// Articles per classification call.
    pub batch_size: usize,
    pub telegram_enabled: bool,
    /// Cap on unique articles considered per run, first-seen order.
    pub max_articles_per_run: usize,
    /// Score threshold below which a KEEP decision is still filtered out.
    pub min_score: u8,
    /// Recency window for the keyword fetches, in days.
    pub days_lookback: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_retries: 3,
            retry_delay_seconds: 5,
            batch_size: 25,
            telegram_enabled: true,
            max_articles_per_run: 100,
            min_score: 5,
            days_lookback: 1,
        }
    }
}

/// A subject-defined output field the classifier should fill and the
/// reporter should label.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtraField {
    pub field: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub default: String,
}

/// Field-mapping table from `subject.yaml`, consumed by the classifier
/// (defaults) and the reporter (labels).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomFields {
    #[serde(default)]
    pub extra_fields: Vec<ExtraField>,
}

/// On-disk shape of `subject.yaml`. Unset pipeline settings fall back to
/// the global configuration.
#[derive(Debug, Default, Deserialize)]
struct SubjectFile {
    name: Option<String>,
    #[serde(default)]
    emoji: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    target_states: Vec<String>,
    #[serde(default)]
    custom_fields: CustomFields,
    model: Option<String>,
    max_retries: Option<u32>,
    retry_delay_seconds: Option<u64>,
    batch_size: Option<usize>,
    telegram_enabled: Option<bool>,
    max_articles_per_run: Option<usize>,
    min_score: Option<u8>,
    days_lookback: Option<u32>,
}

/// A fully loaded subject: the provider interface the pipeline core
/// depends on.
#[derive(Debug, Clone)]
pub struct Subject {
    pub slug: String,
    pub name: String,
    pub emoji: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub target_states: Vec<String>,
    /// Contents of `prompt.md`, passed verbatim as the system prompt.
    pub prompt: String,
    pub settings: Settings,
    pub custom_fields: CustomFields,
}

impl Subject {
    /// Default values for the subject's extra fields, applied to verdicts
    /// the model returns without them.
    pub fn extra_field_defaults(&self) -> BTreeMap<String, String> {
        self.custom_fields
            .extra_fields
            .iter()
            .map(|f| (f.field.clone(), f.default.clone()))
            .collect()
    }
}

/// One row of the subject catalog.
#[derive(Debug, Clone)]
pub struct SubjectSummary {
    pub slug: String,
    pub name: String,
    pub description: String,
}

/// Load `config.yaml`. A missing file is not an error: built-in defaults
/// apply. A present-and-malformed file is a configuration fault.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        warn!(path = %path.display(), "Global config not found, using defaults");
        return Ok(Settings::default());
    }
    let text = fs::read_to_string(path)?;
    serde_yaml::from_str(&text)
        .map_err(|e| MonitorError::Config(format!("{}: {e}", path.display())))
}

/// Load one subject from `subjects/<slug>/` under `root`, merging its
/// overrides over the global settings.
pub fn load_subject(root: &Path, slug: &str, global: &Settings) -> Result<Subject> {
    let subject_dir = root.join("subjects").join(slug);
    if !subject_dir.is_dir() {
        let available = list_subjects(root)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.slug)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(MonitorError::Config(format!(
            "subject '{slug}' not found; available: {}",
            if available.is_empty() { "(none)" } else { &available }
        )));
    }

    let yaml_path = subject_dir.join("subject.yaml");
    let yaml_text = fs::read_to_string(&yaml_path).map_err(|e| {
        MonitorError::Config(format!("missing subject.yaml in {}: {e}", subject_dir.display()))
    })?;
    let file: SubjectFile = serde_yaml::from_str(&yaml_text)
        .map_err(|e| MonitorError::Config(format!("{}: {e}", yaml_path.display())))?;

    let prompt_path = subject_dir.join("prompt.md");
    let prompt = fs::read_to_string(&prompt_path).map_err(|e| {
        MonitorError::Config(format!("missing prompt.md in {}: {e}", subject_dir.display()))
    })?;

    let mut settings = global.clone();
    if let Some(v) = file.model {
        settings.model = v;
    }
    if let Some(v) = file.max_retries {
        settings.max_retries = v;
    }
    if let Some(v) = file.retry_delay_seconds {
        settings.retry_delay_seconds = v;
    }
    if let Some(v) = file.batch_size {
        settings.batch_size = v;
    }
    if let Some(v) = file.telegram_enabled {
        settings.telegram_enabled = v;
    }
    if let Some(v) = file.max_articles_per_run {
        settings.max_articles_per_run = v;
    }
    if let Some(v) = file.min_score {
        settings.min_score = v;
    }
    if let Some(v) = file.days_lookback {
        settings.days_lookback = v;
    }

    Ok(Subject {
        slug: slug.to_string(),
        name: file.name.unwrap_or_else(|| slug.to_string()),
        emoji: file.emoji,
        description: file.description,
        keywords: file.keywords,
        target_states: file.target_states,
        prompt,
        settings,
        custom_fields: file.custom_fields,
    })
}

/// List available subjects under `root/subjects`, sorted by slug.
/// Directories starting with `_` and directories without a `subject.yaml`
/// are skipped.
pub fn list_subjects(root: &Path) -> Result<Vec<SubjectSummary>> {
    let subjects_dir = root.join("subjects");
    if !subjects_dir.is_dir() {
        return Ok(vec![]);
    }

    let mut summaries = Vec::new();
    for entry in fs::read_dir(&subjects_dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let slug = entry.file_name().to_string_lossy().into_owned();
        if slug.starts_with('_') {
            continue;
        }
        let yaml_path = entry.path().join("subject.yaml");
        let Ok(text) = fs::read_to_string(&yaml_path) else {
            continue;
        };
        let file: SubjectFile = serde_yaml::from_str(&text)
            .map_err(|e| MonitorError::Config(format!("{}: {e}", yaml_path.display())))?;
        summaries.push(SubjectSummary {
            slug: slug.clone(),
            name: file.name.unwrap_or(slug),
            description: file.description,
        });
    }

    summaries.sort_by(|a, b| a.slug.cmp(&b.slug));
    Ok(summaries)
}
