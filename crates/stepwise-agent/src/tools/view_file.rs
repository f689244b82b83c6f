use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepwise_llm::ToolDefinition;

use super::{RegisteredTool, ToolFuture, VIEW_FILE_TOOL, decode_arguments, resolve_path};
use crate::ToolError;

/// Ranges whose gap is at most this many lines are shown as one block.
const MERGE_GAP: i64 = 10;

#[derive(Debug, Deserialize)]
struct ViewFileArguments {
    file: String,
    lines: Vec<[i64; 2]>,
}

/// Renders the requested 1-based inclusive line ranges of `file` with line numbers. Inverted
/// ranges and ranges ending before line 1 are dropped; nearby ranges are merged and skipped
/// stretches are marked.
pub async fn view_file(root: &Path, file: &str, ranges: &[[i64; 2]]) -> Result<String, ToolError> {
    let path = resolve_path(root, file);
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|error| ToolError::Execution(format!("failed to read {file}: {error}")))?;
    Ok(render_ranges(file, &content, ranges))
}

fn merge_ranges(ranges: &[[i64; 2]]) -> Vec<(i64, i64)> {
    let mut valid: Vec<(i64, i64)> = ranges
        .iter()
        .filter(|[start, end]| start <= end && *end >= 1)
        .map(|[start, end]| ((*start).max(1), *end))
        .collect();
    valid.sort_by_key(|(start, _)| *start);

    let mut merged: Vec<(i64, i64)> = Vec::new();
    for (start, end) in valid {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(MERGE_GAP) => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn render_ranges(file: &str, content: &str, ranges: &[[i64; 2]]) -> String {
    let total = content.matches('\n').count();
    let lines: Vec<&str> = content.lines().collect();
    let last_line = lines.len() as i64;

    let mut out = format!("File {file} total lines: {total}\n```text\n");
    let mut next_line = 1i64;
    for (start, end) in merge_ranges(ranges) {
        let start = start.max(next_line);
        if start > last_line {
            break;
        }
        if next_line < start {
            let _ = writeln!(out, "# ... [lines {}-{} omitted] ...", next_line, start - 1);
        }
        let end = end.min(last_line);
        for number in start..=end {
            let _ = writeln!(out, "{:4} | {}", number, lines[(number - 1) as usize]);
        }
        next_line = end + 1;
    }
    out.push_str("```\n");
    out
}

pub fn view_file_tool(root: PathBuf) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: VIEW_FILE_TOOL.to_string(),
            description: "Reads specific line ranges from a file. Use this to inspect code or text without loading the entire file into context. Multiple non-contiguous ranges can be requested at once.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["file", "lines"],
                "properties": {
                    "file": {
                        "type": "string",
                        "description": "Path of the file to read, relative to the project root."
                    },
                    "lines": {
                        "type": "array",
                        "description": "Line ranges to retrieve. Each range is a pair [start_line, end_line], 1-indexed and inclusive.",
                        "items": {
                            "type": "array",
                            "items": { "type": "integer" }
                        }
                    }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(move |raw: String| -> ToolFuture {
            let root = root.clone();
            Box::pin(async move {
                let args: ViewFileArguments = decode_arguments(&raw)?;
                view_file(&root, &args.file, &args.lines).await
            })
        }),
    }
}
