//! Persisted run artifacts: run logs, quarantine records, and the HTML
//! report with its companion JSON extract.

pub mod report;
pub mod runlog;
