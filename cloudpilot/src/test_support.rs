//! Test-only doubles for the model and process boundaries.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{ConversationState, Message, ToolCallRequest};
use crate::io::model::{CompletionRequest, ModelClient, ModelUnavailable};
use crate::tools::invoker::{CommandRunner, ProcessOutput};

/// Model that replays queued replies and records every request.
///
/// Once the queue is empty every call fails with [`ModelUnavailable`].
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Message, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, message: Message) -> Self {
        self.push(Ok(message))
    }

    pub fn text(self, content: &str) -> Self {
        self.reply(Message::assistant(content))
    }

    pub fn calls(self, content: &str, calls: Vec<ToolCallRequest>) -> Self {
        self.reply(Message::assistant_with_calls(content, calls))
    }

    pub fn unavailable(self, reason: &str) -> Self {
        self.push(Err(reason.to_string()))
    }

    fn push(self, reply: Result<Message, String>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, request: &CompletionRequest) -> Result<Message> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("request log poisoned"))?
            .push(request.clone());
        let next = self
            .replies
            .lock()
            .map_err(|_| anyhow!("reply queue poisoned"))?
            .pop_front();
        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(reason)) => Err(anyhow!(ModelUnavailable::new(reason))),
            None => Err(anyhow!(ModelUnavailable::new("scripted replies exhausted"))),
        }
    }
}

/// Runner that replays queued process outcomes and records command lines.
///
/// Once the queue is empty every command succeeds with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outputs: Mutex<VecDeque<Result<ProcessOutput, String>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, output: ProcessOutput) -> Self {
        self.push(Ok(output))
    }

    /// Queue a spawn failure.
    pub fn fail_with(self, message: &str) -> Self {
        self.push(Err(message.to_string()))
    }

    fn push(self, output: Result<ProcessOutput, String>) -> Self {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.push_back(output);
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command_line: &str) -> Result<ProcessOutput> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("call log poisoned"))?
            .push(command_line.to_string());
        let next = self
            .outputs
            .lock()
            .map_err(|_| anyhow!("output queue poisoned"))?
            .pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!(message).context("spawn command")),
            None => Ok(ProcessOutput::success("")),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// State holding a single fresh request.
pub fn request(text: &str) -> ConversationState {
    let mut state = ConversationState::new();
    state.begin_request(text);
    state
}

/// Contents of every message, in order.
pub fn contents(state: &ConversationState) -> Vec<&str> {
    state.messages().iter().map(|m| m.content.as_str()).collect()
}
