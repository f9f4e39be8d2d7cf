use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::app_dir_name;

/// Get the local data directory, creating it on first use
pub fn get_default_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join(app_dir_name());

    fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

    Ok(data_dir)
}

pub fn default_database_path() -> Result<PathBuf> {
    Ok(get_default_data_dir()?.join("newsletter.db"))
}

/// Directory the local HTML publisher writes finished issues into
pub fn get_default_output_dir() -> Result<PathBuf> {
    let base = dirs::document_dir().unwrap_or_else(|| PathBuf::from("."));
    let output_dir = base.join(app_dir_name());

    fs::create_dir_all(&output_dir).context("Failed to create output directory")?;

    Ok(output_dir)
}

/// Write a markdown export next to other issue artifacts
pub fn save_markdown(dir: &Path, issue_number: i64, markdown: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let filepath = dir.join(format!("issue-{:03}.md", issue_number));
    fs::write(&filepath, markdown)
        .with_context(|| format!("Failed to write markdown file: {}", filepath.display()))?;

    Ok(filepath)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_markdown_pads_issue_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_markdown(dir.path(), 7, "# Hello").unwrap();

        assert!(path.ends_with("issue-007.md"));
        assert_eq!(fs::read_to_string(path).unwrap(), "# Hello");
    }
}
