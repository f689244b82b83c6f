use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use stepwise_llm::ToolDefinition;

use super::{EDIT_FILE_TOOL, RegisteredTool, ToolFuture, decode_arguments};
use crate::patch::PatchApplier;

#[derive(Debug, Deserialize)]
struct EditFileArguments {
    file: String,
    unified_diff: String,
}

pub fn edit_file_tool(applier: Arc<PatchApplier>) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: EDIT_FILE_TOOL.to_string(),
            description: "Applies changes to one file from a unified diff. The diff is dry-run first and the file is only modified when every hunk applies cleanly.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["file", "unified_diff"],
                "properties": {
                    "file": {
                        "type": "string",
                        "description": "Path of the file to patch, relative to the project root."
                    },
                    "unified_diff": {
                        "type": "string",
                        "description": "GNU unified diff with ---/+++ headers naming only this file and @@ hunks in ascending order."
                    }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(move |raw: String| -> ToolFuture {
            let applier = applier.clone();
            Box::pin(async move {
                let args: EditFileArguments = decode_arguments(&raw)?;
                applier.apply(&args.file, &args.unified_diff).await?;
                Ok(format!("Apply edit to file {} success", args.file))
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolError;
    use crate::tools::Tool;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test(flavor = "current_thread")]
    async fn validation_failures_surface_as_validation_errors() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        let tool = edit_file_tool(Arc::new(PatchApplier::new(dir.path(), Duration::from_secs(5))));

        let raw = json!({
            "file": "a.txt",
            "unified_diff": "--- a/other.txt\n+++ b/other.txt\n@@ -1,1 +1,1 @@\n-a\n+b\n"
        })
        .to_string();
        let error = tool.invoke(&raw).await.unwrap_err();
        assert!(matches!(error, ToolError::Validation(message) if message.starts_with("security violation")));

        let raw = json!({
            "file": "a.txt",
            "unified_diff": "--- a/a.txt\n+++ b/a.txt\n@@ -50,1 +50,1 @@\n-a\n+b\n@@ -10,1 +10,1 @@\n-c\n+d\n"
        })
        .to_string();
        let error = tool.invoke(&raw).await.unwrap_err();
        assert!(matches!(error, ToolError::Validation(message) if message.contains("ascending order")));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a\n");
    }
}
