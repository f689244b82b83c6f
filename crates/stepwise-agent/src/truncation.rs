//! Caps the text a tool result shows the model. The execution log keeps the full output.

use crate::AgentConfig;
use crate::tools::{CREATE_FILE_TOOL, EDIT_FILE_TOOL};

const FALLBACK_CHAR_BUDGET: usize = 20_000;

/// Which part of an oversized output survives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keep {
    /// Start and end; the middle is elided.
    Ends,
    /// Only the end. File tools report their verdict last.
    End,
}

/// How much of one tool's output reaches the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputBudget {
    pub chars: usize,
    pub lines: Option<usize>,
    pub keep: Keep,
}

impl OutputBudget {
    pub fn for_tool(tool_name: &str, config: &AgentConfig) -> Self {
        Self {
            chars: config
                .tool_output_limits
                .get(tool_name)
                .copied()
                .unwrap_or(FALLBACK_CHAR_BUDGET),
            lines: config.tool_line_limits.get(tool_name).copied(),
            keep: match tool_name {
                EDIT_FILE_TOOL | CREATE_FILE_TOOL => Keep::End,
                _ => Keep::Ends,
            },
        }
    }

    /// Character budget first, then the line budget on what is left.
    pub fn apply(&self, output: &str) -> String {
        let mut shown = self.clip_chars(output);
        if let Some(limit) = self.lines {
            shown = clip_lines(&shown, limit).unwrap_or(shown);
        }
        shown
    }

    fn clip_chars(&self, output: &str) -> String {
        let total = output.chars().count();
        if total <= self.chars {
            return output.to_string();
        }
        let elided = total - self.chars;
        match self.keep {
            Keep::Ends => {
                let head_end = byte_offset(output, self.chars / 2);
                let tail_start = byte_offset(output, self.chars / 2 + elided);
                format!(
                    "{}\n\n[output clipped: {elided} characters elided from the middle; the execution log has all of it]\n\n{}",
                    &output[..head_end],
                    &output[tail_start..]
                )
            }
            Keep::End => format!(
                "[output clipped: first {elided} characters elided; the execution log has all of it]\n\n{}",
                &output[byte_offset(output, elided)..]
            ),
        }
    }
}

/// Keeps the first and last halves of `limit` lines. `None` when the text already fits.
fn clip_lines(text: &str, limit: usize) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= limit {
        return None;
    }
    let head = limit / 2;
    let tail = limit - head;
    Some(format!(
        "{}\n[{} lines elided]\n{}",
        lines[..head].join("\n"),
        lines.len() - limit,
        lines[lines.len() - tail..].join("\n")
    ))
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::BASH_TOOL;

    fn budget(chars: usize, keep: Keep) -> OutputBudget {
        OutputBudget {
            chars,
            lines: None,
            keep,
        }
    }

    #[test]
    fn middle_is_elided_for_shell_like_tools() {
        let shown = budget(6, Keep::Ends).apply("abcdefghij");
        assert!(shown.starts_with("abc\n\n[output clipped: 4 characters elided from the middle"));
        assert!(shown.ends_with("]\n\nhij"));
    }

    #[test]
    fn file_tools_keep_the_end_on_char_boundaries() {
        let config = AgentConfig::default();
        assert_eq!(OutputBudget::for_tool(EDIT_FILE_TOOL, &config).keep, Keep::End);

        let shown = budget(2, Keep::End).apply("ééééé");
        assert!(shown.starts_with("[output clipped: first 3 characters elided"));
        assert!(shown.ends_with("\n\néé"));
    }

    #[test]
    fn short_output_is_untouched() {
        let config = AgentConfig::default();
        assert_eq!(OutputBudget::for_tool("unknown", &config).apply("ok"), "ok");
        assert_eq!(clip_lines("1\n2", 2), None);
    }

    #[test]
    fn line_budget_keeps_both_halves() {
        assert_eq!(
            clip_lines("1\n2\n3\n4\n5\n6", 4).as_deref(),
            Some("1\n2\n[2 lines elided]\n5\n6")
        );
    }

    #[test]
    fn bash_output_is_bounded_by_line_limit() {
        let config = AgentConfig::default();
        let long = (0..1000).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        let shown = OutputBudget::for_tool(BASH_TOOL, &config).apply(&long);
        assert!(shown.lines().count() <= 257);
        assert!(shown.starts_with("0\n1\n"));
        assert!(shown.ends_with("999"));
    }
}
