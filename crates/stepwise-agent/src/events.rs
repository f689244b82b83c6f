use crate::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

pub type EventData = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    LoopStart,
    Request,
    Response,
    ToolCallStart,
    ToolCallEnd,
    LoopEnd,
    Error,
}

/// One transcript event of an agent loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub timestamp: String,
    pub loop_id: String,
    pub role: String,
    pub data: EventData,
}

impl AuditEvent {
    pub fn new(
        kind: AuditEventKind,
        loop_id: impl Into<String>,
        role: impl Into<String>,
        data: Value,
    ) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => EventData::new(),
            other => EventData::from_iter([("value".to_string(), other)]),
        };
        Self {
            kind,
            timestamp: timestamp_now(),
            loop_id: loop_id.into(),
            role: role.into(),
            data,
        }
    }

    pub fn tool_call_start(
        loop_id: &str,
        role: &str,
        call_id: &str,
        tool_name: &str,
        raw_arguments: &str,
    ) -> Self {
        Self::new(
            AuditEventKind::ToolCallStart,
            loop_id,
            role,
            serde_json::json!({
                "call_id": call_id,
                "tool_name": tool_name,
                "arguments": raw_arguments,
            }),
        )
    }

    pub fn tool_call_end(
        loop_id: &str,
        role: &str,
        call_id: &str,
        log_id: usize,
        output: Option<&str>,
        error: Option<&str>,
        duration_ms: u128,
    ) -> Self {
        Self::new(
            AuditEventKind::ToolCallEnd,
            loop_id,
            role,
            serde_json::json!({
                "call_id": call_id,
                "log_id": log_id,
                "output": output,
                "error": error,
                "duration_ms": duration_ms as u64,
            }),
        )
    }
}

/// Receives every transcript event of the loops it is injected into.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent) -> Result<(), AgentError>;

    fn flush(&self) -> Result<(), AgentError> {
        Ok(())
    }

    fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct BufferedAuditSink {
    inner: Arc<Mutex<Vec<AuditEvent>>>,
}

impl BufferedAuditSink {
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for BufferedAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), AgentError> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Appends events as JSON lines. Emitting after `close` is an error.
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), AgentError> {
        let line = serde_json::to_string(&event)
            .map_err(|error| AgentError::Audit(format!("encode event: {error}")))?;
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = guard
            .as_mut()
            .ok_or_else(|| AgentError::Audit(format!("{} is closed", self.path.display())))?;
        writeln!(writer, "{line}")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AgentError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = guard.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), AgentError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for FileAuditSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub(crate) fn timestamp_now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{}.{:03}Z",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    )
}
