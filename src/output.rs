use owo_colors::Stream::Stderr;
use owo_colors::{OwoColorize, Style};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use crate::diagnostic::TypeError;

/// Summary statistics for a one-shot check run.
#[derive(Serialize)]
pub struct Summary {
    pub checked_files: usize,
    pub clean_files: usize,
    pub files_with_errors: usize,
    pub total_errors: usize,
    #[serde(serialize_with = "duration_ms")]
    pub duration: Duration,
    pub jobs: usize,
}

fn duration_ms<S: serde::Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(d.as_millis())
}

/// Output format for the `check` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Human,
    Json,
}

fn plural(n: usize, singular: &str, plural_form: &str) -> String {
    if n == 1 {
        format!("{n} {singular}")
    } else {
        format!("{n} {plural_form}")
    }
}

fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Render diagnostics and the summary line for humans on stderr.
///
/// `sources` maps relative paths to file contents for span rendering.
pub fn render_human(
    errors: &BTreeMap<String, Vec<TypeError>>,
    summary: &Summary,
    sources: &BTreeMap<String, String>,
    out: &mut impl Write,
) {
    static EMPTY: String = String::new();
    for (path, file_errors) in errors {
        let source = sources.get(path).unwrap_or(&EMPTY);
        for error in file_errors {
            let report = miette::Report::new(error.to_renderable(source));
            let _ = writeln!(out, "{report:?}");
        }
    }

    let line = if summary.total_errors == 0 {
        format!(
            "All {} clean in {}",
            plural(summary.checked_files, "file", "files"),
            format_duration(summary.duration),
        )
        .if_supports_color(Stderr, |text| text.style(Style::new().green().bold()))
        .to_string()
    } else {
        format!(
            "Found {} in {} ({} checked, {})",
            plural(summary.total_errors, "error", "errors"),
            plural(summary.files_with_errors, "file", "files"),
            summary.checked_files,
            format_duration(summary.duration),
        )
        .if_supports_color(Stderr, |text| text.style(Style::new().red().bold()))
        .to_string()
    };
    let _ = writeln!(out, "{line}");
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    errors: &'a BTreeMap<String, Vec<TypeError>>,
    summary: &'a Summary,
}

/// Machine-readable results on stdout.
pub fn render_json(
    errors: &BTreeMap<String, Vec<TypeError>>,
    summary: &Summary,
    out: &mut impl Write,
) {
    let output = JsonOutput { errors, summary };
    if let Ok(text) = serde_json::to_string_pretty(&output) {
        let _ = writeln!(out, "{text}");
    }
}
