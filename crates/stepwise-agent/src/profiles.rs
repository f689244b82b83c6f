use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tools::{FINISH_TASK_TOOL, ToolExecutionRecord};

const ORCHESTRATOR_INSTRUCTION: &str = r#"You are the Task Orchestrator. You break the USER PRIMARY GOAL into the smallest useful units of work.
Compare the TASK HISTORY with the USER PRIMARY GOAL and take exactly one path:

PATH A, the goal is not reached yet:
- Identify the single next step and call `create_task` for it. A task has one goal only.
- Ask for at most two or three essential facts in `conclusion_requirement`.
- Use `context_requirement` for background worth recording (file locations, versions, caveats).

PATH B, the task history answers the goal:
- Reply to the user directly without calling any tool. Combine the conclusions into one coherent
  answer and add background context where it helps.

Never create a task with several goals. Never ask a task for "everything"."#;

const WORKER_INSTRUCTION: &str = r#"You are a worker agent. The USER PRIMARY GOAL has been decomposed into tasks and your job is the CURRENT TASK only.
Meet its conclusion instruction and its background context instruction as precisely as you can, using the available tools.

When the current task is accomplished, immediately call `finish_task` with the conclusion and the
context entries. Reference the TOOL_LOG_ID a context entry was observed in when there is one.
Do not work on the rest of the USER PRIMARY GOAL after calling `finish_task`."#;

const CONTEXT_REFINE_INSTRUCTION: &str = r#"You are the Context Refine agent. You keep the recorded context of the last finished task short and well organised.
You are given the task history, the context entries of the last finished task and the tool execution log records they reference.
Use `refine_context` to renumber entries so related items sit together and the most important come first.
Reply without calling any tool once the context is in order."#;

pub(crate) const WORKER_REMINDER: &str =
    "The current task is still open. Continue working on it, and call `finish_task` once it is accomplished.";

/// The three loop roles of a workflow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Worker,
    ContextRefine,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::Worker => "worker",
            AgentRole::ContextRefine => "context_refine",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            AgentRole::Orchestrator => ORCHESTRATOR_INSTRUCTION,
            AgentRole::Worker => WORKER_INSTRUCTION,
            AgentRole::ContextRefine => CONTEXT_REFINE_INSTRUCTION,
        }
    }

    /// Whether a response without tool calls ends the loop. A worker is reminded of its task
    /// instead.
    pub fn ends_without_tool_calls(self) -> bool {
        !matches!(self, AgentRole::Worker)
    }

    /// Whether the loop ends right after dispatching `batch`.
    pub fn ends_after_batch(self, batch: &[ToolExecutionRecord]) -> bool {
        match self {
            AgentRole::Worker => batch
                .iter()
                .any(|record| record.tool_name == FINISH_TASK_TOOL),
            AgentRole::Orchestrator | AgentRole::ContextRefine => false,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
