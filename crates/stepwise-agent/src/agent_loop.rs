//! The request/dispatch cycle shared by every role.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stepwise_llm::{Client, Message, Request, Response};
use tokio::sync::Notify;

use crate::profiles::WORKER_REMINDER;
use crate::{
    AgentConfig, AgentError, AgentRole, AuditEvent, AuditEventKind, AuditSink, ToolRegistry,
};

/// Cancels a running loop from another task. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    abort_requested: Arc<AtomicBool>,
    abort_notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        self.abort_notify.notify_waiters();
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.abort_requested.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Requesting,
    ToolExecuting,
    Terminated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopOutcome {
    pub final_message: String,
    pub iterations: usize,
}

pub struct AgentLoop {
    id: String,
    role: AgentRole,
    instruction: String,
    user_context: String,
    registry: ToolRegistry,
    client: Arc<Client>,
    config: AgentConfig,
    audit: Arc<dyn AuditSink>,
    abort: AbortHandle,
    transcript: Vec<Message>,
    state: LoopState,
}

impl AgentLoop {
    pub fn new(
        role: AgentRole,
        user_context: impl Into<String>,
        registry: ToolRegistry,
        client: Arc<Client>,
        config: AgentConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            instruction: role.instruction().to_string(),
            user_context: user_context.into(),
            registry,
            client,
            config,
            audit,
            abort: AbortHandle::new(),
            transcript: Vec::new(),
            state: LoopState::Idle,
        }
    }

    /// Replaces the role's built-in system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ToolRegistry {
        self.registry
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Drives request/dispatch rounds until the role's termination rule holds.
    pub async fn run(&mut self) -> Result<LoopOutcome, AgentError> {
        self.registry
            .attach_audit(self.audit.clone(), self.id.clone(), self.role.as_str());
        self.transcript = vec![
            Message::system(self.instruction.clone()),
            Message::user(self.user_context.clone()),
        ];
        self.emit(
            AuditEventKind::LoopStart,
            json!({
                "model": self.config.model,
                "tools": self.registry.names(),
                "max_iterations": self.config.max_iterations,
                "system": self.instruction,
                "user": self.user_context,
            }),
        );
        tracing::info!(loop_id = %self.id, role = %self.role, "agent loop started");

        let result = self.drive().await;
        self.state = LoopState::Terminated;
        match &result {
            Ok(outcome) => {
                self.emit(
                    AuditEventKind::LoopEnd,
                    json!({
                        "iterations": outcome.iterations,
                        "final_message": outcome.final_message,
                    }),
                );
                tracing::info!(
                    loop_id = %self.id,
                    role = %self.role,
                    iterations = outcome.iterations,
                    "agent loop finished"
                );
            }
            Err(error) => {
                self.emit(AuditEventKind::Error, json!({ "error": error.to_string() }));
                tracing::warn!(loop_id = %self.id, role = %self.role, error = %error, "agent loop failed");
            }
        }
        if let Err(error) = self.audit.flush() {
            tracing::warn!(error = %error, "audit flush failed");
        }
        result
    }

    async fn drive(&mut self) -> Result<LoopOutcome, AgentError> {
        let mut iterations = 0usize;
        loop {
            if self.abort.is_abort_requested() {
                return Err(AgentError::Aborted);
            }
            if self.config.max_iterations > 0 && iterations >= self.config.max_iterations {
                return Err(AgentError::TurnLimit {
                    role: self.role.to_string(),
                    max_iterations: self.config.max_iterations,
                });
            }
            iterations += 1;

            self.state = LoopState::Requesting;
            let mut request = Request::new(self.config.model.clone(), self.transcript.clone())
                .with_tools(self.registry.export_schemas());
            request.provider = self.config.provider.clone();
            self.emit(
                AuditEventKind::Request,
                json!({
                    "iteration": iterations,
                    "messages": request.messages.len(),
                    "tools": request.tools.as_ref().map_or(0, Vec::len),
                }),
            );

            let response = self.complete(request).await?;
            let text = response.text();
            let tool_calls = response.tool_calls();
            self.emit(
                AuditEventKind::Response,
                json!({
                    "iteration": iterations,
                    "content": text,
                    "finish_reason": response.finish_reason.as_str(),
                    "tool_calls": tool_calls
                        .iter()
                        .map(|call| json!({
                            "id": call.id,
                            "name": call.name,
                            "arguments": call.arguments,
                        }))
                        .collect::<Vec<Value>>(),
                }),
            );
            self.transcript
                .push(Message::assistant_with_tool_calls(text.clone(), tool_calls.clone()));

            if tool_calls.is_empty() {
                if self.role.ends_without_tool_calls() {
                    return Ok(LoopOutcome {
                        final_message: text,
                        iterations,
                    });
                }
                tracing::debug!(loop_id = %self.id, iteration = iterations, "worker replied without tool calls");
                self.transcript.push(Message::user(WORKER_REMINDER));
                continue;
            }

            self.state = LoopState::ToolExecuting;
            let batch_start = self.registry.log().len();
            for call in &tool_calls {
                let envelope = self
                    .registry
                    .dispatch(&call.name, &call.arguments, &call.id)
                    .await;
                self.transcript
                    .push(Message::tool_result(call.id.clone(), envelope));
                if let Some(Err(error)) = self.registry.log().last().map(|record| &record.result) {
                    if error.aborts_loop() {
                        return Err(AgentError::ToolSubstrate {
                            tool: call.name.clone(),
                            message: error.to_string(),
                        });
                    }
                }
            }

            if self.role.ends_after_batch(&self.registry.log()[batch_start..]) {
                return Ok(LoopOutcome {
                    final_message: text,
                    iterations,
                });
            }
        }
    }

    /// One chat request, bounded by the request timeout and cut short by an abort.
    async fn complete(&self, request: Request) -> Result<Response, AgentError> {
        let notified = self.abort.abort_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.abort.is_abort_requested() {
            return Err(AgentError::Aborted);
        }

        let client = self.client.clone();
        let request_timeout = self.config.request_timeout;
        let llm_call = async move {
            match request_timeout {
                Some(limit) => tokio::time::timeout(limit, client.complete(request))
                    .await
                    .map_err(|_| AgentError::RequestTimeout(limit))?
                    .map_err(AgentError::from),
                None => client.complete(request).await.map_err(AgentError::from),
            }
        };
        tokio::pin!(llm_call);

        tokio::select! {
            result = &mut llm_call => result,
            _ = &mut notified => Err(AgentError::Aborted),
        }
    }

    fn emit(&self, kind: AuditEventKind, data: Value) {
        let event = AuditEvent::new(kind, self.id.clone(), self.role.as_str(), data);
        if let Err(error) = self.audit.emit(event) {
            tracing::warn!(error = %error, "dropping audit event");
        }
    }
}
