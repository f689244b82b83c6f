//! Task lifecycle ledger: one in-flight task plus the ordered history of completed ones.
//!
//! The ledger renders itself into the context block every agent role starts from. Rendering is
//! pure; the same ledger state always produces the same text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::LedgerError;
use crate::tools::ToolExecutionRecord;

pub const NO_TASK_IN_PROGRESS: &str = "NO TASK IN PROGRESS";

const HISTORY_INTRO: &str = "Below is the task history with the result of each task. The result of each task includes conclusion and context information.";

/// Ledger handle shared between the workflow driver and the task tools.
pub type SharedLedger = Arc<Mutex<TaskLedger>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub id: u32,
    pub description: String,
    /// Execution log id of the tool call this context was observed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_log_id: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: usize,
    pub goal: String,
    pub conclusion_requirement: String,
    pub context_requirement: String,
    pub completed: bool,
    pub conclusion: String,
    pub context_entries: BTreeMap<u32, ContextEntry>,
}

impl TaskItem {
    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "Task {}: {}", self.id, self.goal);
        if !self.completed {
            let _ = writeln!(out, "Conclusions Instruction: {}", self.conclusion_requirement);
            let _ = writeln!(
                out,
                "Background Context Instruction: {}",
                self.context_requirement
            );
            return;
        }

        if !self.conclusion.is_empty() {
            let _ = writeln!(out, "Conclusions:\n{}", self.conclusion);
        }
        if !self.context_entries.is_empty() {
            out.push_str("Retrieved Context: ");
            for entry in self.context_entries.values() {
                let _ = write!(out, "#{}: {}, ", entry.id, entry.description);
            }
            out.push('\n');
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLedger {
    user_goal: String,
    completed: Vec<TaskItem>,
    current: Option<TaskItem>,
}

impl TaskLedger {
    pub fn new(user_goal: impl Into<String>) -> Self {
        Self {
            user_goal: user_goal.into(),
            ..Self::default()
        }
    }

    pub fn shared(user_goal: impl Into<String>) -> SharedLedger {
        Arc::new(Mutex::new(Self::new(user_goal)))
    }

    pub fn reset(&mut self, user_goal: impl Into<String>) {
        self.user_goal = user_goal.into();
        self.completed.clear();
        self.current = None;
    }

    pub fn user_goal(&self) -> &str {
        &self.user_goal
    }

    pub fn current(&self) -> Option<&TaskItem> {
        self.current.as_ref()
    }

    pub fn completed(&self) -> &[TaskItem] {
        &self.completed
    }

    pub fn has_current_task(&self) -> bool {
        self.current.is_some()
    }

    /// Opens a task. Ids are sequential across the ledger's lifetime since only one task can be
    /// open and every open task ends up in `completed`.
    pub fn create_task(
        &mut self,
        goal: impl Into<String>,
        conclusion_requirement: impl Into<String>,
        context_requirement: impl Into<String>,
    ) -> Result<&TaskItem, LedgerError> {
        if let Some(current) = &self.current {
            return Err(LedgerError::TaskInProgress {
                goal: current.goal.clone(),
            });
        }
        let task = self.current.insert(TaskItem {
            id: self.completed.len() + 1,
            goal: goal.into(),
            conclusion_requirement: conclusion_requirement.into(),
            context_requirement: context_requirement.into(),
            completed: false,
            conclusion: String::new(),
            context_entries: BTreeMap::new(),
        });
        Ok(task)
    }

    pub fn finish_task(
        &mut self,
        conclusion: impl Into<String>,
        context_entries: Vec<ContextEntry>,
    ) -> Result<&TaskItem, LedgerError> {
        if self.current.is_none() {
            return Err(LedgerError::NoCurrentTask);
        }
        let mut entries = BTreeMap::new();
        for entry in context_entries {
            let id = entry.id;
            if entries.insert(id, entry).is_some() {
                return Err(LedgerError::DuplicateContextId { id });
            }
        }

        let Some(mut task) = self.current.take() else {
            return Err(LedgerError::NoCurrentTask);
        };
        task.completed = true;
        task.conclusion = conclusion.into();
        task.context_entries = entries;
        self.completed.push(task);
        self.completed.last().ok_or(LedgerError::NoCompletedTask)
    }

    /// Renumbers one context entry of the most recently completed task. Either the entry moves
    /// or nothing changes.
    pub fn refine_context(&mut self, old_id: u32, new_id: u32) -> Result<(), LedgerError> {
        let task = self
            .completed
            .last_mut()
            .ok_or(LedgerError::NoCompletedTask)?;
        if !task.context_entries.contains_key(&old_id) {
            return Err(LedgerError::ContextNotFound {
                task_id: task.id,
                id: old_id,
            });
        }
        if old_id == new_id {
            return Ok(());
        }
        if task.context_entries.contains_key(&new_id) {
            return Err(LedgerError::ContextIdCollision {
                task_id: task.id,
                id: new_id,
            });
        }
        if let Some(mut entry) = task.context_entries.remove(&old_id) {
            entry.id = new_id;
            task.context_entries.insert(new_id, entry);
        }
        Ok(())
    }

    pub fn render_context_prompt(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "** USER PRIMARY GOAL **: {}", self.user_goal);
        let _ = writeln!(out, "\n{HISTORY_INTRO}");
        out.push_str("### TASK HISTORY\n");
        if !self.completed.is_empty() {
            out.push_str("** Completed Tasks **\n");
            for task in &self.completed {
                task.render(&mut out);
            }
            out.push('\n');
        }

        match &self.current {
            None => {
                out.push_str(NO_TASK_IN_PROGRESS);
                out.push('\n');
            }
            Some(task) => {
                out.push_str("** Current Tasks **\n");
                task.render(&mut out);
            }
        }
        out.push('\n');
        out
    }

    /// Ledger view for the context-refine role: the rendered history, the entries of the most
    /// recently completed task, and the execution records those entries point at.
    pub fn render_refine_prompt(&self, tool_log: &[ToolExecutionRecord]) -> String {
        let mut out = self.render_context_prompt();
        let Some(task) = self.completed.last() else {
            return out;
        };

        let _ = writeln!(out, "### CONTEXT TO REFINE (Task {})", task.id);
        if task.context_entries.is_empty() {
            out.push_str("(no context recorded)\n");
        }
        for entry in task.context_entries.values() {
            match entry.tool_log_id {
                Some(log_id) => {
                    let _ = writeln!(
                        out,
                        "#{}: {} (TOOL_LOG_ID: {})",
                        entry.id, entry.description, log_id
                    );
                }
                None => {
                    let _ = writeln!(out, "#{}: {}", entry.id, entry.description);
                }
            }
        }

        let mut referenced: Vec<usize> = task
            .context_entries
            .values()
            .filter_map(|entry| entry.tool_log_id)
            .collect();
        referenced.sort_unstable();
        referenced.dedup();
        if referenced.is_empty() {
            return out;
        }

        out.push_str("\n### TOOL EXECUTION LOG\n");
        for log_id in referenced {
            match tool_log.iter().find(|record| record.id == log_id) {
                Some(record) => {
                    let _ = writeln!(
                        out,
                        "tool name: {}\ntool args: {}\n{}",
                        record.tool_name,
                        record.raw_arguments,
                        record.envelope()
                    );
                }
                None => {
                    let _ = writeln!(out, "TOOL_LOG_ID: {log_id} (record not available)");
                }
            }
        }
        out
    }
}
