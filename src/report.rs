//! Terminal output for run results.
//!
//! Errors read top-down: the root cause first, then each context note added
//! on the way up. Everything goes to stderr so stub text on stdout stays
//! clean.

use colored::*;
use std::io::{self, Write};

use crate::error::{Error, RunFailure};
use crate::pipeline::RunSummary;

/// Root cause first, then the notes from innermost to outermost.
pub fn error_lines(error: &anyhow::Error) -> (String, Vec<String>) {
    let chain: Vec<String> = error.chain().map(|cause| cause.to_string()).collect();
    let mut chain = chain.into_iter().rev();
    let root = chain.next().unwrap_or_default();
    (root, chain.collect())
}

/// Whether any cause in the chain is confined to one translation unit.
fn is_per_file(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<Error>())
        .any(Error::is_per_file)
}

pub fn write_failure(failure: &RunFailure) {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    let _ = render_failure(&mut out, failure);
}

pub fn render_failure(out: &mut dyn Write, failure: &RunFailure) -> io::Result<()> {
    for error in &failure.errors {
        let (root, notes) = error_lines(error);
        writeln!(out, "{} {}", "error:".red().bold(), root)?;
        for note in notes {
            writeln!(out, "  {} {}", "note:".cyan(), note)?;
        }
    }
    let count = failure.errors.len();
    let per_file = failure.errors.iter().filter(|e| is_per_file(e)).count();
    let scope = if per_file > 0 {
        format!(" ({} in individual files)", per_file)
    } else {
        String::new()
    };
    writeln!(
        out,
        "{}",
        format!(
            "✗ {} error{}{}; output in this run is not trustworthy",
            count,
            plural(count),
            scope
        )
        .red()
    )
}

pub fn write_summary(summary: &RunSummary) {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    let _ = render_summary(&mut out, summary);
}

pub fn render_summary(out: &mut dyn Write, summary: &RunSummary) -> io::Result<()> {
    write!(out, "{}", "✓ ".green())?;
    write!(
        out,
        "{} file{} ({} cached)",
        summary.files,
        plural(summary.files),
        summary.cached
    )?;
    writeln!(
        out,
        "  {} module{}, {} class{}, {} enum{}, {} type rule{}",
        summary.modules,
        plural(summary.modules),
        summary.classes,
        if summary.classes == 1 { "" } else { "es" },
        summary.enums,
        plural(summary.enums),
        summary.rules,
        plural(summary.rules)
    )?;
    if !summary.written.is_empty() {
        writeln!(
            out,
            "  {} {}",
            "wrote".dimmed(),
            format!("{} stub file{}", summary.written.len(), plural(summary.written.len()))
        )?;
    }
    if summary.format_failures > 0 {
        writeln!(
            out,
            "  {} post-formatter failed on {} file{}",
            "warning:".yellow(),
            summary.format_failures,
            plural(summary.format_failures)
        )?;
    }
    Ok(())
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
