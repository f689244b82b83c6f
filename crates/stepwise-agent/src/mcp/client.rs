use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::McpError;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// How to launch one tool server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct McpServerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl McpServerSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Splits a command line on whitespace: the first word is the program.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace();
        let command = words.next()?;
        Some(Self::new(command).with_args(words))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct McpCallResult {
    /// Every text content item, each followed by a newline.
    pub text: String,
    pub is_error: bool,
}

/// JSON-RPC 2.0 client for a tool server speaking newline-delimited JSON over stdio.
pub struct McpClient {
    server_name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: i64,
    timeout: Duration,
}

impl McpClient {
    /// Starts the server and completes the initialize handshake.
    pub async fn spawn(spec: &McpServerSpec, timeout: Duration) -> Result<Self, McpError> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: spec.command.clone(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("tool server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("tool server stdout unavailable".to_string()))?;

        let mut client = Self {
            server_name: String::new(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            timeout,
        };
        client.initialize().await?;
        tracing::info!(server = %client.server_name, command = %spec.command, "tool server started");
        Ok(client)
    }

    /// Name the server reported during initialization.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "stepwise", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        self.server_name = result
            .get("serverInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::Protocol("initialize result lacks serverInfo.name".to_string()))?
            .to_string();
        self.notify("notifications/initialized", json!({})).await
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let listed = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| McpError::Protocol("tools/list result lacks tools".to_string()))?;
            for tool in listed {
                let name = tool
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| McpError::Protocol("listed tool lacks a name".to_string()))?;
                tools.push(McpToolInfo {
                    name: name.to_string(),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: tool.get("inputSchema").cloned().unwrap_or(Value::Null),
                });
            }
            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|next| !next.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<McpCallResult, McpError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let mut text = String::new();
        for item in result
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(chunk) = item.get("text").and_then(Value::as_str) {
                text.push_str(chunk);
                text.push('\n');
            }
        }
        Ok(McpCallResult {
            text,
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Closes stdin and waits for the server to exit, killing it after the timeout.
    pub async fn close(self) -> Result<(), McpError> {
        let Self {
            mut child,
            stdin,
            timeout,
            ..
        } = self;
        drop(stdin);
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                status?;
                Ok(())
            }
            Err(_) => {
                child.kill().await?;
                Ok(())
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await?;

        let timeout = self.timeout;
        let response = tokio::time::timeout(timeout, self.receive(id))
            .await
            .map_err(|_| McpError::Timeout(timeout))??;

        if let Some(error) = response.get("error") {
            return Err(McpError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("tool server error")
                    .to_string(),
            });
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| McpError::Protocol(format!("{method} response lacks a result")))
    }

    async fn send(&mut self, message: Value) -> Result<(), McpError> {
        let mut line = message.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Reads until the response carrying `id`; server notifications and requests are skipped.
    async fn receive(&mut self, id: i64) -> Result<Value, McpError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(McpError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = serde_json::from_str(&line)
                .map_err(|error| McpError::Protocol(format!("invalid JSON from tool server: {error}")))?;
            if message.get("id").and_then(Value::as_i64) == Some(id) && message.get("method").is_none() {
                return Ok(message);
            }
            tracing::trace!(message = %line, "skipping tool server message");
        }
    }
}

/// A bash-scripted tool server for tests. It answers initialize, tools/list and tools/call with
/// canned payloads, echoing the request id.
#[cfg(test)]
pub(crate) fn fake_server_spec(server_name: &str) -> McpServerSpec {
    let script = format!(
        r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"2024-11-05","capabilities":{{}},"serverInfo":{{"name":"{server_name}","version":"0.1"}}}}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{{"jsonrpc":"2.0","method":"notifications/message","params":{{}}}}\n'
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"tools":[{{"name":"shout","description":"Shout text","inputSchema":{{"type":"object","properties":{{"text":{{"type":"string"}}}},"required":["text"]}}}}]}}}}\n' "$id" ;;
    *'"name":"broken"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"error":{{"code":-32602,"message":"unknown tool broken"}}}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"content":[{{"type":"text","text":"HELLO"}},{{"type":"text","text":"WORLD"}}]}}}}\n' "$id" ;;
  esac
done
"#
    );
    McpServerSpec::new("bash").with_args(["-c".to_string(), script])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lines_split_into_program_and_args() {
        let spec = McpServerSpec::parse("  npx -y server-files /tmp ").unwrap();
        assert_eq!(spec.command, "npx");
        assert_eq!(spec.args, vec!["-y", "server-files", "/tmp"]);
        assert!(McpServerSpec::parse("   ").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handshake_listing_and_calls() {
        let mut client = McpClient::spawn(&fake_server_spec("fake"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(client.server_name(), "fake");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "shout");
        assert_eq!(tools[0].input_schema["required"], json!(["text"]));

        let result = client.call_tool("shout", json!({ "text": "hello" })).await.unwrap();
        assert_eq!(result.text, "HELLO\nWORLD\n");
        assert!(!result.is_error);

        let error = client.call_tool("broken", json!({})).await.unwrap_err();
        assert!(matches!(error, McpError::Rpc { code: -32602, .. }));

        client.close().await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_binary_is_a_spawn_error() {
        let spec = McpServerSpec::new("/nonexistent/stepwise-tool-server");
        let error = McpClient::spawn(&spec, Duration::from_secs(1)).await.err().unwrap();
        assert!(matches!(error, McpError::Spawn { .. }));
    }
}
