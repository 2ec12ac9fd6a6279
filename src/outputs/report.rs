//! HTML report rendering and the companion JSON extract.
//!
//! The report is one self-contained HTML file per run, written to
//! `reports/<subject>/<date>.html`. Kept articles appear score-descending
//! with every structured field; killed articles are listed compactly at
//! the end for auditability. Runs with zero kept articles write no report.

use crate::error::Result;
use crate::models::{RunResult, Verdict};
use crate::subjects::Subject;
use crate::utils::ensure_writable_dir;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

/// Render and write the HTML report. Returns `None` when the run kept no
/// articles.
#[instrument(level = "info", skip_all, fields(subject = %subject.slug))]
pub async fn write_report(
    root: &Path,
    subject: &Subject,
    result: &RunResult,
) -> Result<Option<PathBuf>> {
    if result.kept().is_empty() {
        info!("No kept articles, skipping report");
        return Ok(None);
    }

    let dir = root.join("reports").join(&subject.slug);
    ensure_writable_dir(&dir).await?;

    let path = dir.join(format!("{}.html", result.date));
    fs::write(&path, render_html(subject, result)).await?;

    info!(path = %path.display(), kept = result.kept_count, "Report written");
    Ok(Some(path))
}

/// Write the kept verdicts as a standalone JSON extract next to the report,
/// for downstream tooling. Returns `None` when nothing was kept.
#[instrument(level = "info", skip_all, fields(subject = %subject.slug))]
pub async fn write_kept_json(
    root: &Path,
    subject: &Subject,
    result: &RunResult,
) -> Result<Option<PathBuf>> {
    let kept: Vec<&Verdict> = result.kept();
    if kept.is_empty() {
        return Ok(None);
    }

    let dir = root.join("reports").join(&subject.slug);
    ensure_writable_dir(&dir).await?;

    let path = dir.join(format!("{}_kept.json", result.date));
    let json = serde_json::to_string_pretty(&kept)?;
    fs::write(&path, json).await?;

    info!(path = %path.display(), "Kept-article extract written");
    Ok(Some(path))
}

fn render_html(subject: &Subject, result: &RunResult) -> String {
    let mut html = String::with_capacity(16 * 1024);

    let title = format!("{} {} — {}", subject.emoji, subject.name, result.date);
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n<style>{}</style>\n</head>\n<body>\n",
        escape(&title),
        STYLE
    );

    let _ = write!(
        html,
        "<header>\n<h1>{} {}</h1>\n<p class=\"date\">{}</p>\n</header>\n",
        escape(&subject.emoji),
        escape(&subject.name),
        escape(&result.date)
    );

    // Summary strip.
    let _ = write!(
        html,
        "<section class=\"summary\">\n\
         <div class=\"stat\"><b>{}</b> fetched</div>\n\
         <div class=\"stat\"><b>{}</b> classified</div>\n\
         <div class=\"stat\"><b>{}</b> kept</div>\n\
         <div class=\"stat\"><b>{}</b> killed</div>\n",
        result.articles_fetched, result.articles_classified, result.kept_count, result.killed_count
    );
    if result.batches_quarantined > 0 {
        let _ = write!(
            html,
            "<div class=\"stat warn\"><b>{}/{}</b> batches quarantined</div>\n",
            result.batches_quarantined, result.batches_total
        );
    }
    html.push_str("</section>\n");

    if !result.label_counts.is_empty() {
        html.push_str("<section class=\"labels\">\n<h2>By classification</h2>\n<ul>\n");
        for (label, count) in &result.label_counts {
            let _ = write!(html, "<li>{}: {}</li>\n", escape(label), count);
        }
        html.push_str("</ul>\n</section>\n");
    }

    html.push_str("<section class=\"kept\">\n<h2>Kept articles</h2>\n");
    for verdict in result.kept() {
        render_kept(&mut html, subject, verdict);
    }
    html.push_str("</section>\n");

    let killed = result.killed();
    if !killed.is_empty() {
        html.push_str("<section class=\"killed\">\n<h2>Filtered out</h2>\n<ul>\n");
        for verdict in killed {
            let _ = write!(
                html,
                "<li><span class=\"score\">{}</span> {}</li>\n",
                verdict.score,
                escape(&verdict.headline)
            );
        }
        html.push_str("</ul>\n</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_kept(html: &mut String, subject: &Subject, verdict: &Verdict) {
    let _ = write!(
        html,
        "<article>\n<h3><a href=\"{}\">{}</a> <span class=\"score\">{}/10</span></h3>\n",
        escape(&verdict.source_url),
        escape(&verdict.headline),
        verdict.score
    );

    let mut fields: Vec<(&str, &str)> = vec![
        ("Classification", verdict.classification.as_str()),
        ("City", verdict.city.as_str()),
        ("State", verdict.state.as_str()),
        ("Location", verdict.location_details.as_str()),
        ("Initiator", verdict.initiator.as_str()),
        ("Stage", verdict.stage.as_str()),
        ("Timeline", verdict.timeline.as_str()),
        ("Next steps", verdict.next_steps.as_str()),
    ];

    // Subject-defined fields, with the labels from subject.yaml.
    for field in &subject.custom_fields.extra_fields {
        if let Some(value) = verdict.extra.get(&field.field) {
            let label = if field.label.is_empty() {
                &field.field
            } else {
                &field.label
            };
            fields.push((label, value));
        }
    }

    html.push_str("<dl>\n");
    for (label, value) in fields {
        if !value.is_empty() {
            let _ = write!(html, "<dt>{}</dt><dd>{}</dd>\n", escape(label), escape(value));
        }
    }
    html.push_str("</dl>\n");

    if !verdict.reasoning.is_empty() {
        let _ = write!(
            html,
            "<p class=\"reasoning\">{}</p>\n",
            escape(&verdict.reasoning)
        );
    }
    html.push_str("</article>\n");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = "\
body{font-family:system-ui,sans-serif;max-width:860px;margin:0 auto;padding:1rem;color:#1a1a1a}\
header h1{margin-bottom:0}\
.date{color:#666;margin-top:.25rem}\
.summary{display:flex;gap:1rem;flex-wrap:wrap;margin:1rem 0}\
.stat{background:#f2f2f2;border-radius:6px;padding:.5rem .75rem}\
.stat.warn{background:#fdecea}\
article{border:1px solid #ddd;border-radius:8px;padding:.75rem 1rem;margin:.75rem 0}\
article h3{margin:.25rem 0}\
article a{color:#0b57d0;text-decoration:none}\
.score{color:#666;font-weight:normal;font-size:.9em}\
dl{display:grid;grid-template-columns:max-content 1fr;gap:.2rem .8rem;margin:.5rem 0}\
dt{font-weight:600}\
dd{margin:0}\
.reasoning{color:#444;font-style:italic}\
.killed ul{color:#888}";
