//! Durable dumps of aggregate failures.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `errors` one per line, sorted, to a new file and return its path.
///
/// The file is created in `dir`, or the system temp directory when `dir` is
/// `None`, and is kept after the process exits.
pub fn write_error_dump<E: ToString>(dir: Option<&Path>, prefix: &str, errors: &[E]) -> Result<PathBuf> {
    let mut lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
    lines.sort();

    let file_prefix = format!("{prefix}-");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&file_prefix).suffix(".txt");
    let mut file = match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating dump directory {}", dir.display()))?;
            builder.tempfile_in(dir)
        }
        None => builder.tempfile(),
    }
    .context("creating error dump file")?;

    file.write_all(lines.join("\n").as_bytes())
        .context("writing error dump")?;
    let (_, path) = file.keep().context("keeping error dump")?;
    Ok(path)
}

/// Dump `errors` and describe where they went. Never fails: if the dump
/// cannot be written the description says so.
pub fn dump_location<E: ToString>(dir: Option<&Path>, prefix: &str, errors: &[E]) -> String {
    match write_error_dump(dir, prefix, errors) {
        Ok(path) => path.display().to_string(),
        Err(err) => {
            tracing::error!(error = %err, "failed to write error dump");
            format!("<dump failed: {err}>")
        }
    }
}
