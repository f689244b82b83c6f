#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use stepwise_llm::{
    Client, FinishReason, Message, ProviderAdapter, Request, Response, SDKError, ToolCall, Usage,
};

/// Replays queued responses in order and records every request it receives.
#[derive(Clone)]
pub struct SequenceAdapter {
    pub name: String,
    pub responses: Arc<Mutex<VecDeque<Response>>>,
    pub requests: Arc<Mutex<Vec<Request>>>,
}

impl SequenceAdapter {
    pub fn new(responses: Vec<Response>) -> Self {
        Self {
            name: "sequence".to_string(),
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn client(&self) -> Arc<Client> {
        Arc::new(Client::with_provider(Arc::new(self.clone())))
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests mutex").clone()
    }
}

#[async_trait]
impl ProviderAdapter for SequenceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        self.requests.lock().expect("requests mutex").push(request);
        self.responses
            .lock()
            .expect("responses mutex")
            .pop_front()
            .ok_or_else(|| SDKError::configuration("no response queued"))
    }
}

/// Never answers.
pub struct StalledAdapter;

#[async_trait]
impl ProviderAdapter for StalledAdapter {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _request: Request) -> Result<Response, SDKError> {
        std::future::pending().await
    }
}

pub fn stalled_client() -> Arc<Client> {
    Arc::new(Client::with_provider(Arc::new(StalledAdapter)))
}

pub fn text_response(text: &str) -> Response {
    Response {
        id: "resp".to_string(),
        model: "test-model".to_string(),
        provider: "sequence".to_string(),
        message: Message::assistant(text),
        finish_reason: FinishReason::Stop,
        usage: Usage::default(),
    }
}

/// A response issuing `calls` as `(name, arguments)` pairs with ids `call-0`, `call-1`, ...
pub fn tool_call_response(calls: &[(&str, &str)]) -> Response {
    let tool_calls = calls
        .iter()
        .enumerate()
        .map(|(index, (name, arguments))| ToolCall::new(format!("call-{index}"), *name, *arguments))
        .collect();
    Response {
        id: "resp".to_string(),
        model: "test-model".to_string(),
        provider: "sequence".to_string(),
        message: Message::assistant_with_tool_calls("", tool_calls),
        finish_reason: FinishReason::ToolCalls,
        usage: Usage::default(),
    }
}

pub fn binary_available(name: &str) -> bool {
    std::process::Command::new(name)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
