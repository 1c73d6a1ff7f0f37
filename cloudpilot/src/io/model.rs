//! Language model boundary.
//!
//! The [`ModelClient`] trait decouples the agent from the actual completion
//! backend. Production uses [`CommandModel`], which talks to an adapter
//! process over stdin/stdout JSON. Tests use scripted clients.

use std::fmt;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Message, ToolCallRequest};
use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;
use crate::tools::ToolDefinition;

/// One completion request: conversation so far plus the tools on offer.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    /// System prompt followed by `messages`.
    pub fn new(system_prompt: String, messages: Vec<Message>) -> Self {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(Message::system(system_prompt));
        all.extend(messages);
        Self {
            messages: all,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Abstraction over completion backends.
pub trait ModelClient {
    /// Produce the next assistant message. Failures to reach the model should
    /// carry a [`ModelUnavailable`] in the error chain.
    fn complete(&self, request: &CompletionRequest) -> Result<Message>;
}

impl<M: ModelClient + ?Sized> ModelClient for &M {
    fn complete(&self, request: &CompletionRequest) -> Result<Message> {
        (**self).complete(request)
    }
}

/// The model could not be reached or returned something unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUnavailable {
    pub reason: String,
}

impl ModelUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ModelUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model unavailable: {}", self.reason)
    }
}

impl std::error::Error for ModelUnavailable {}

/// True when `err` was caused by the model being unreachable.
pub fn is_model_unavailable(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ModelUnavailable>().is_some())
}

/// Model client that spawns an adapter command per completion.
///
/// The adapter reads the request JSON on stdin and prints a reply on stdout:
/// `{"content": "..." | [parts], "tool_calls": [{"id"?, "name", "arguments"}]}`.
pub struct CommandModel {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    next_call_id: AtomicU64,
}

impl CommandModel {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            argv: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            next_call_id: AtomicU64::new(1),
        }
    }

    fn assign_id(&self) -> String {
        format!("call_{}", self.next_call_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl ModelClient for CommandModel {
    #[instrument(skip_all, fields(messages = request.messages.len(), tools = request.tools.len()))]
    fn complete(&self, request: &CompletionRequest) -> Result<Message> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("model.command is empty"))?;
        info!(program = %program, "requesting completion");

        let payload = serde_json::to_vec(request).context("serialize completion request")?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|e| anyhow!(ModelUnavailable::new(format!("{e:#}"))))
        .with_context(|| format!("run model adapter {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model adapter timed out");
            return Err(anyhow!(ModelUnavailable::new(format!(
                "adapter timed out after {}s",
                self.timeout.as_secs()
            ))));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model adapter failed");
            return Err(anyhow!(ModelUnavailable::new(format!(
                "adapter exited with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ))));
        }

        let message = parse_reply(&output.stdout, || self.assign_id())
            .map_err(|e| anyhow!(ModelUnavailable::new(format!("{e:#}"))))?;
        debug!(tool_calls = message.tool_calls().len(), "completion received");
        Ok(message)
    }
}

#[derive(Debug, Deserialize)]
struct ReplyEnvelope {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Vec<ReplyToolCall>,
}

#[derive(Debug, Deserialize)]
struct ReplyToolCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Parse an adapter reply into an assistant message.
pub fn parse_reply(bytes: &[u8], mut assign_id: impl FnMut() -> String) -> Result<Message> {
    let reply: ReplyEnvelope = serde_json::from_slice(bytes).context("parse model reply json")?;
    let content = reply.content.as_ref().map(flatten_content).unwrap_or_default();

    let mut calls = Vec::with_capacity(reply.tool_calls.len());
    for call in reply.tool_calls {
        let arguments = match call.arguments {
            Value::Null => Default::default(),
            // Some backends send arguments as an encoded JSON string.
            Value::String(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parse arguments of tool call {}", call.name))?,
            Value::Object(map) => map.into_iter().collect(),
            other => {
                return Err(anyhow!(
                    "tool call {} has non-object arguments: {other}",
                    call.name
                ));
            }
        };
        let id = call
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(&mut assign_id);
        calls.push(ToolCallRequest {
            id,
            name: call.name,
            arguments,
        });
    }

    Ok(Message::assistant_with_calls(content, calls))
}

/// Content may be a string or a list of parts (strings or `{"text": ...}`).
fn flatten_content(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.clone()),
                Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MessageKind;

    fn counter() -> impl FnMut() -> String {
        let mut n = 0;
        move || {
            n += 1;
            format!("gen_{n}")
        }
    }

    #[test]
    fn plain_text_reply() {
        let msg = parse_reply(br#"{"content":"hello"}"#, counter()).expect("parse");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn list_content_is_joined_with_newlines() {
        let msg = parse_reply(
            br#"{"content":["first",{"type":"text","text":"second"}]}"#,
            counter(),
        )
        .expect("parse");
        assert_eq!(msg.content, "first\nsecond");
    }

    #[test]
    fn tool_calls_get_ids_when_missing() {
        let msg = parse_reply(
            br#"{"content":null,"tool_calls":[
                {"name":"run_gcloud_command","arguments":{"command":"gcloud config list"}},
                {"id":"abc","name":"list_available_commands","arguments":"{}"}
            ]}"#,
            counter(),
        )
        .expect("parse");
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "gen_1");
        assert_eq!(calls[0].arg_str("command"), Some("gcloud config list"));
        assert_eq!(calls[1].id, "abc");
        assert!(calls[1].arguments.is_empty());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = parse_reply(
            br#"{"tool_calls":[{"name":"x","arguments":[1,2]}]}"#,
            counter(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-object arguments"));
    }

    #[test]
    fn request_starts_with_system_prompt() {
        let request = CompletionRequest::new("sys".to_string(), vec![Message::user("hi")]);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, "sys");
    }

    #[cfg(unix)]
    #[test]
    fn adapter_failure_is_model_unavailable() {
        let model = CommandModel::from_config(&ModelConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()],
            timeout_secs: 5,
            output_limit_bytes: 1024,
        });
        let request = CompletionRequest::new("sys".to_string(), vec![Message::user("hi")]);
        let err = model.complete(&request).unwrap_err();
        assert!(is_model_unavailable(&err));
    }

    #[cfg(unix)]
    #[test]
    fn adapter_reply_is_parsed() {
        let model = CommandModel::from_config(&ModelConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"cat >/dev/null; echo '{"content":"ok"}'"#.to_string(),
            ],
            timeout_secs: 5,
            output_limit_bytes: 1024,
        });
        let request = CompletionRequest::new("sys".to_string(), vec![Message::user("hi")]);
        let msg = model.complete(&request).expect("complete");
        assert_eq!(msg.content, "ok");
    }
}
