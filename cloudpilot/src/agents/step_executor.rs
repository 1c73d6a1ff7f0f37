//! Step executor: runs the plan step at `current_step`.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::types::{ConversationState, Message};
use crate::io::model::{CompletionRequest, ModelClient};
use crate::tools::ToolDefinition;

pub const PLAN_COMPLETE: &str = "All steps have been completed successfully!";

/// Step executor agent; owns the step prompt and the tools offered per step.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    system_prompt: String,
    tools: Vec<ToolDefinition>,
}

impl StepExecutor {
    pub fn new(system_prompt: impl Into<String>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            tools,
        }
    }

    /// Execute one step and advance the cursor.
    ///
    /// Returns the state unchanged when there is no step left. Tool calls in
    /// the reply are left for the dispatcher, so on the last step
    /// [`PLAN_COMPLETE`] is appended before those calls are answered: it marks
    /// that every step has been handed to the model, not that its commands
    /// have finished.
    #[instrument(skip_all, fields(step = ?state.current_step(), steps = state.plan().len()))]
    pub fn run<M: ModelClient>(
        &self,
        model: &M,
        state: &ConversationState,
    ) -> Result<ConversationState> {
        let Some(index) = state.current_step().filter(|&i| i < state.plan().len()) else {
            debug!("no pending step");
            return Ok(state.clone());
        };
        let total = state.plan().len();
        let description = &state.plan()[index];

        let mut next = state.clone();
        next.push(Message::assistant(format!(
            "Step {}/{total}: {description}",
            index + 1
        )));

        // The step is run in isolation: no history, no view of the full plan.
        let instruction = Message::user(format!("Please execute this step: {description}"));
        let completion = CompletionRequest::new(self.system_prompt.clone(), vec![instruction])
            .with_tools(self.tools.clone());
        let reply = model
            .complete(&completion)
            .with_context(|| format!("execute step {}/{total}", index + 1))?;
        info!(
            step = index + 1,
            tool_calls = reply.tool_calls().len(),
            "step response received"
        );
        next.push(reply);
        next.advance_step();

        if next.current_step() == Some(total) {
            next.push(Message::assistant(PLAN_COMPLETE));
        }
        Ok(next)
    }
}
