//! Shared conversation types threaded through every component.
//!
//! These types carry no I/O. Plan fields on [`ConversationState`] can only be
//! changed from inside the crate (plan builder and step executor); callers
//! append user messages and read everything else.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// How the turn router treats a fresh user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Decompose each new request into a plan and execute it step by step.
    #[default]
    Planned,
    /// Send every request straight to the model and its tool loop.
    Direct,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// String argument by name, `None` when absent or not a string.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Outcome of a tool call, always rendered back into the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { output: String },
    SafetyRejected { reason: String },
    /// Soft block: the command was not run and needs explicit user approval.
    ConfirmationRequired { command: String, keyword: String },
    ExecutionError { message: String },
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::SafetyRejected {
            reason: reason.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Text handed to the model as the tool response.
    pub fn render(&self) -> String {
        match self {
            Self::Success { output } => output.clone(),
            Self::SafetyRejected { reason } => format!(
                "SAFETY CHECK: {reason}. For security reasons this operation is not permitted."
            ),
            Self::ConfirmationRequired { command, keyword } => format!(
                "Warning: The command `{command}` contains '{keyword}' which could be destructive. \
                 Please confirm with the user before proceeding with this operation."
            ),
            Self::ExecutionError { message } => format!("Error: {message}"),
        }
    }
}

/// Closed set of message shapes, decided when the message is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    ToolCalls {
        calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        result: ToolResult,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub kind: MessageKind,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            kind: MessageKind::Text,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Assistant message; an empty `calls` list yields a plain text message.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        if calls.is_empty() {
            return Self::assistant(content);
        }
        Self {
            role: Role::Assistant,
            content: content.into(),
            kind: MessageKind::ToolCalls { calls },
        }
    }

    pub fn tool_result(call: &ToolCallRequest, result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.render(),
            kind: MessageKind::ToolResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result,
            },
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match &self.kind {
            MessageKind::ToolCalls { calls } => calls,
            _ => &[],
        }
    }

    pub fn tool_result_ref(&self) -> Option<(&str, &ToolResult)> {
        match &self.kind {
            MessageKind::ToolResult {
                call_id, result, ..
            } => Some((call_id.as_str(), result)),
            _ => None,
        }
    }
}

/// Conversation record threaded through the router and its components.
///
/// `current_step` is `None` when no plan is active. Otherwise it is a valid
/// index into `plan`, or `plan.len()` once every step has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    plan_created: bool,
    plan: Vec<String>,
    current_step: Option<usize>,
    approved_commands: BTreeSet<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn plan_created(&self) -> bool {
        self.plan_created
    }

    pub fn plan(&self) -> &[String] {
        &self.plan
    }

    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    /// True while `current_step` points at a step that has not run yet.
    pub fn has_pending_step(&self) -> bool {
        self.plan_created
            && self
                .current_step
                .is_some_and(|step| step < self.plan.len())
    }

    /// Start a new request: clear any previous plan and append the user text.
    pub fn begin_request(&mut self, text: impl Into<String>) {
        self.plan_created = false;
        self.plan.clear();
        self.current_step = None;
        self.messages.push(Message::user(text));
    }

    /// Append a user message that continues the current request.
    pub fn push_follow_up(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// Record a command line the user explicitly confirmed.
    pub fn approve_command(&mut self, command_line: &str) {
        self.approved_commands
            .insert(normalize_command_line(command_line));
    }

    pub fn approved_commands(&self) -> &BTreeSet<String> {
        &self.approved_commands
    }

    pub fn latest_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|msg| msg.is_user())
    }

    /// Tool calls on the latest tool-call message that have no result yet.
    ///
    /// The scan stops at the most recent user message: calls from an earlier
    /// request are never resurrected.
    pub fn pending_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let mut answered = BTreeSet::new();
        for msg in self.messages.iter().rev() {
            if msg.is_user() {
                return Vec::new();
            }
            if let Some((call_id, _)) = msg.tool_result_ref() {
                answered.insert(call_id);
                continue;
            }
            let calls = msg.tool_calls();
            if !calls.is_empty() {
                return calls
                    .iter()
                    .filter(|call| !answered.contains(call.id.as_str()))
                    .collect();
            }
        }
        Vec::new()
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn set_plan(&mut self, plan: Vec<String>) {
        self.current_step = if plan.is_empty() { None } else { Some(0) };
        self.plan = plan;
        self.plan_created = true;
    }

    /// Move the cursor past the current step, saturating at `plan.len()`.
    pub(crate) fn advance_step(&mut self) {
        if let Some(step) = self.current_step {
            self.current_step = Some((step + 1).min(self.plan.len()));
        }
    }
}

/// Collapse runs of whitespace so approvals match regardless of spacing.
pub fn normalize_command_line(command_line: &str) -> String {
    command_line.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "run_gcloud_command").with_arg("command", "gcloud config list")
    }

    #[test]
    fn begin_request_clears_previous_plan() {
        let mut state = ConversationState::new();
        state.begin_request("first");
        state.set_plan(vec!["a".to_string()]);
        state.advance_step();

        state.begin_request("second");

        assert!(!state.plan_created());
        assert!(state.plan().is_empty());
        assert_eq!(state.current_step(), None);
        assert_eq!(state.messages().len(), 2);
    }

    #[test]
    fn set_plan_with_no_steps_leaves_cursor_unset() {
        let mut state = ConversationState::new();
        state.set_plan(Vec::new());
        assert!(state.plan_created());
        assert_eq!(state.current_step(), None);
        assert!(!state.has_pending_step());
    }

    #[test]
    fn advance_step_saturates_at_plan_length() {
        let mut state = ConversationState::new();
        state.set_plan(vec!["a".to_string()]);
        state.advance_step();
        state.advance_step();
        assert_eq!(state.current_step(), Some(1));
        assert!(!state.has_pending_step());
    }

    #[test]
    fn pending_tool_calls_skips_answered_calls() {
        let mut state = ConversationState::new();
        state.begin_request("list config");
        state.push(Message::assistant_with_calls(
            "",
            vec![call("call-1"), call("call-2")],
        ));
        state.push(Message::tool_result(
            &call("call-1"),
            ToolResult::success("ok"),
        ));

        let pending = state.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "call-2");
    }

    #[test]
    fn pending_tool_calls_looks_past_trailing_text() {
        let mut state = ConversationState::new();
        state.begin_request("do it");
        state.push(Message::assistant_with_calls("", vec![call("call-1")]));
        state.push(Message::assistant("All steps have been completed successfully!"));

        assert_eq!(state.pending_tool_calls().len(), 1);
    }

    #[test]
    fn pending_tool_calls_stop_at_user_message() {
        let mut state = ConversationState::new();
        state.push(Message::assistant_with_calls("", vec![call("call-1")]));
        state.push_follow_up("never mind");
        assert!(state.pending_tool_calls().is_empty());
    }

    #[test]
    fn assistant_with_empty_calls_is_plain_text() {
        let msg = Message::assistant_with_calls("hello", Vec::new());
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn approvals_are_whitespace_normalized() {
        let mut state = ConversationState::new();
        state.approve_command("  gcloud  compute instances delete vm-1 ");
        assert!(
            state
                .approved_commands()
                .contains("gcloud compute instances delete vm-1")
        );
    }

    #[test]
    fn rendered_results_are_never_empty() {
        let results = [
            ToolResult::success("out"),
            ToolResult::rejected("nope"),
            ToolResult::error("boom"),
            ToolResult::ConfirmationRequired {
                command: "gsutil rm gs://b/o".to_string(),
                keyword: "rm".to_string(),
            },
        ];
        for result in results {
            assert!(!result.render().is_empty());
        }
    }
}
