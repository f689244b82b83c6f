use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use stepwise_llm::ToolDefinition;

use super::{
    CREATE_TASK_TOOL, FINISH_TASK_TOOL, REFINE_CONTEXT_TOOL, RegisteredTool, ToolFuture,
    decode_arguments,
};
use crate::ledger::{ContextEntry, SharedLedger};

#[derive(Debug, Deserialize)]
struct CreateTaskArguments {
    goal: String,
    #[serde(default)]
    conclusion_requirement: String,
    #[serde(default)]
    context_requirement: String,
}

/// One context item reported by `finish_task`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ContextEntryArgument {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub tool_log_id: Option<usize>,
}

impl From<ContextEntryArgument> for ContextEntry {
    fn from(argument: ContextEntryArgument) -> Self {
        ContextEntry {
            id: argument.id,
            description: argument.description,
            tool_log_id: argument.tool_log_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FinishTaskArguments {
    conclusion: String,
    #[serde(default)]
    context: Vec<ContextEntryArgument>,
}

#[derive(Debug, Deserialize)]
struct RefineContextArguments {
    old_id: u32,
    new_id: u32,
}

pub fn create_task_tool(ledger: SharedLedger) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: CREATE_TASK_TOOL.to_string(),
            description: "Defines a structured task by outlining the objective, the specific instruction about target conclusion to extract, and the background context to observe and record.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["goal", "conclusion_requirement", "context_requirement"],
                "properties": {
                    "goal": {
                        "type": "string",
                        "description": "The high-level objective of the task."
                    },
                    "conclusion_requirement": {
                        "type": "string",
                        "description": "What direct facts to extract as the output of the task. May be empty."
                    },
                    "context_requirement": {
                        "type": "string",
                        "description": "What background context to observe and record. May be empty."
                    }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(move |raw: String| -> ToolFuture {
            let ledger = ledger.clone();
            Box::pin(async move {
                let args: CreateTaskArguments = decode_arguments(&raw)?;
                let mut ledger = ledger.lock().await;
                let task = ledger.create_task(
                    args.goal,
                    args.conclusion_requirement,
                    args.context_requirement,
                )?;
                tracing::info!(task_id = task.id, goal = %task.goal, "task created");
                Ok(format!("Task {} created", task.id))
            })
        }),
    }
}

pub fn finish_task_tool(ledger: SharedLedger) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: FINISH_TASK_TOOL.to_string(),
            description: "Finish the current in progress task with the conclusion and the background context observed while working on it.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["conclusion"],
                "properties": {
                    "conclusion": {
                        "type": "string",
                        "description": "The short and concise conclusions and facts required by the task conclusion instruction."
                    },
                    "context": {
                        "type": "array",
                        "description": "Background context items required by the task context instruction.",
                        "items": {
                            "type": "object",
                            "required": ["id", "description"],
                            "properties": {
                                "id": { "type": "integer", "description": "Identifier unique within this task." },
                                "description": { "type": "string" },
                                "tool_log_id": {
                                    "type": "integer",
                                    "description": "TOOL_LOG_ID of the tool call the context was observed in."
                                }
                            }
                        }
                    }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(move |raw: String| -> ToolFuture {
            let ledger = ledger.clone();
            Box::pin(async move {
                let args: FinishTaskArguments = decode_arguments(&raw)?;
                let entries = args.context.into_iter().map(ContextEntry::from).collect();
                let mut ledger = ledger.lock().await;
                let task = ledger.finish_task(args.conclusion, entries)?;
                tracing::info!(task_id = task.id, context = task.context_entries.len(), "task finished");
                Ok(format!("Task {} finished", task.id))
            })
        }),
    }
}

pub fn refine_context_tool(ledger: SharedLedger) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: REFINE_CONTEXT_TOOL.to_string(),
            description: "Renumber one context entry of the last finished task, moving it from old_id to new_id.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["old_id", "new_id"],
                "properties": {
                    "old_id": { "type": "integer" },
                    "new_id": { "type": "integer" }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(move |raw: String| -> ToolFuture {
            let ledger = ledger.clone();
            Box::pin(async move {
                let args: RefineContextArguments = decode_arguments(&raw)?;
                ledger
                    .lock()
                    .await
                    .refine_context(args.old_id, args.new_id)?;
                Ok(format!("Context #{} is now #{}", args.old_id, args.new_id))
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolError;
    use crate::ledger::TaskLedger;
    use crate::tools::Tool;

    #[tokio::test(flavor = "current_thread")]
    async fn create_then_finish_updates_shared_ledger() {
        let ledger = TaskLedger::shared("ship it");
        let create = create_task_tool(ledger.clone());
        let finish = finish_task_tool(ledger.clone());

        let output = create
            .invoke(r#"{"goal":"read config","conclusion_requirement":"port","context_requirement":"paths"}"#)
            .await
            .unwrap();
        assert_eq!(output, "Task 1 created");

        let output = finish
            .invoke(r#"{"conclusion":"port is 8080","context":[{"id":1,"description":"config at etc/app.toml","tool_log_id":0}]}"#)
            .await
            .unwrap();
        assert_eq!(output, "Task 1 finished");

        let prompt = ledger.lock().await.render_context_prompt();
        assert!(prompt.contains("port is 8080"));
        assert!(prompt.contains("#1: config at etc/app.toml"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn second_create_is_a_state_error() {
        let ledger = TaskLedger::shared("goal");
        let create = create_task_tool(ledger);
        create.invoke(r#"{"goal":"a"}"#).await.unwrap();
        let error = create.invoke(r#"{"goal":"b"}"#).await.unwrap_err();
        assert_eq!(
            error,
            ToolError::State("Current Task a not finished, can not create new task".to_string())
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn finish_without_task_and_bad_arguments_are_reported() {
        let ledger = TaskLedger::shared("goal");
        let finish = finish_task_tool(ledger);
        let error = finish.invoke(r#"{"conclusion":"x"}"#).await.unwrap_err();
        assert!(matches!(error, ToolError::State(_)));
        let error = finish.invoke(r#"{"context":[]}"#).await.unwrap_err();
        assert!(matches!(error, ToolError::Validation(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refine_moves_entry_or_reports_collision() {
        let ledger = TaskLedger::shared("goal");
        {
            let mut guard = ledger.lock().await;
            guard.create_task("t", "", "").unwrap();
            guard
                .finish_task(
                    "done",
                    vec![
                        ContextEntry { id: 1, description: "a".into(), tool_log_id: None },
                        ContextEntry { id: 2, description: "b".into(), tool_log_id: None },
                    ],
                )
                .unwrap();
        }
        let refine = refine_context_tool(ledger.clone());

        let error = refine.invoke(r#"{"old_id":1,"new_id":2}"#).await.unwrap_err();
        assert!(matches!(error, ToolError::State(_)));
        refine.invoke(r#"{"old_id":1,"new_id":7}"#).await.unwrap();

        let guard = ledger.lock().await;
        let ids: Vec<u32> = guard.completed()[0].context_entries.keys().copied().collect();
        assert_eq!(ids, vec![2, 7]);
    }
}
