//! Write each expanded part to its own file.

use std::path::{Path, PathBuf};

use crate::model::message::Message;
use crate::processor::part_filename;

/// Summary of one attached part, as printed by the CLI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PartSummary {
    /// Position in the container, starting at 1.
    pub index: usize,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

/// Describe the direct children of an expansion container.
pub fn summarize(container: &Message) -> Vec<PartSummary> {
    container
        .children()
        .iter()
        .enumerate()
        .map(|(i, part)| PartSummary {
            index: i + 1,
            filename: part.filename().unwrap_or_default(),
            content_type: part.content_type(),
            size: part.payload().map_or(0, <[u8]>::len),
        })
        .collect()
}

/// Write every leaf child of `container` into `output_dir`, named after its
/// disposition filename. Returns the written paths in part order.
pub fn export_parts(container: &Message, output_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let mut paths = Vec::new();

    for (i, part) in container.children().iter().enumerate() {
        let Some(payload) = part.payload() else {
            tracing::warn!(index = i + 1, "Skipping nested container while exporting parts");
            continue;
        };
        let name = part.filename().unwrap_or_else(|| part_filename(i + 1));
        let path = unique_path(&output_dir.join(sanitize_filename_part(&name, 150)));
        std::fs::write(&path, payload)?;
        paths.push(path);
    }

    Ok(paths)
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    // Fallback, very unlikely
    parent.join(format!("{stem}_dup.{ext}"))
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        sanitized
    }
}
