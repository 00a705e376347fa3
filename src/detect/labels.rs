use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Load a newline-delimited label file. Order defines class indices.
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label file {}", path.display()))?;
    let labels = parse_labels(&raw);
    if labels.is_empty() {
        return Err(anyhow!("label file {} contains no labels", path.display()));
    }
    log::info!("{} labels loaded from {}", labels.len(), path.display());
    Ok(labels)
}

pub(crate) fn parse_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
