//! Turn driver: evaluate the router, run the chosen component, repeat.
//!
//! A turn ends when the router selects [`Route::EndTurn`] or the transition
//! limit is reached. Components never mutate the caller's state, so a failed
//! transition leaves the last consistent state available in [`TurnFailure`].

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::agents::planner::PlanBuilder;
use crate::agents::step_executor::StepExecutor;
use crate::core::router::{Route, route};
use crate::core::types::{AgentMode, ConversationState, Message, MessageKind, ToolResult};
use crate::io::config::AgentConfig;
use crate::io::model::{CompletionRequest, ModelClient, is_model_unavailable};
use crate::io::prompt::{PromptInputs, PromptLibrary};
use crate::tools::ToolBox;
use crate::tools::invoker::CommandRunner;
use crate::tools::sandbox::{CodeSandbox, SANDBOX_FUNCTIONS};

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStop {
    /// The router found nothing left to do.
    Ended,
    /// `max_transitions_per_turn` transitions ran without reaching the end.
    TransitionLimit { limit: usize },
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub transitions: usize,
    pub stop: TurnStop,
    first_new: usize,
}

impl TurnOutcome {
    /// Messages appended during this turn.
    pub fn new_messages(&self) -> &[Message] {
        &self.state.messages()[self.first_new..]
    }

    /// Commands held for confirmation during this turn, as `(command, keyword)`.
    pub fn confirmation_requests(&self) -> Vec<(&str, &str)> {
        self.new_messages()
            .iter()
            .filter_map(|msg| match &msg.kind {
                MessageKind::ToolResult {
                    result: ToolResult::ConfirmationRequired { command, keyword },
                    ..
                } => Some((command.as_str(), keyword.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// A transition failed; `state` is everything appended before it.
#[derive(Debug)]
pub struct TurnFailure {
    pub state: ConversationState,
    pub error: anyhow::Error,
}

impl TurnFailure {
    pub fn is_model_unavailable(&self) -> bool {
        is_model_unavailable(&self.error)
    }
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn failed: {:#}", self.error)
    }
}

impl std::error::Error for TurnFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// The assembled agent: model, tools and the three prompts.
pub struct Agent<M, R> {
    model: M,
    tools: ToolBox<R>,
    planner: PlanBuilder,
    steps: StepExecutor,
    assistant_prompt: String,
    mode: AgentMode,
    max_transitions: usize,
}

impl<M: ModelClient, R: CommandRunner> Agent<M, R> {
    pub fn new(model: M, tools: ToolBox<R>, mode: AgentMode, max_transitions: usize) -> Result<Self> {
        let definitions = tools.definitions();
        let sandbox_functions = if tools.sandbox_enabled() {
            SANDBOX_FUNCTIONS.iter().map(|f| f.to_string()).collect()
        } else {
            Vec::new()
        };
        let inputs = PromptInputs::new(tools.policy(), definitions.clone(), sandbox_functions);
        let prompts = PromptLibrary::render(&inputs).context("render system prompts")?;

        Ok(Self {
            model,
            planner: PlanBuilder::new(prompts.planner),
            steps: StepExecutor::new(prompts.step, definitions),
            assistant_prompt: prompts.assistant,
            tools,
            mode,
            max_transitions,
        })
    }

    /// Build the policy, tool box and prompts described by `config`.
    pub fn from_config(config: &AgentConfig, model: M, runner: R) -> Result<Self> {
        let policy = Arc::new(config.tools.policy());
        let sandbox = config
            .sandbox
            .enabled
            .then(|| CodeSandbox::from_config(&config.sandbox));
        let tools = ToolBox::new(policy, runner, sandbox, config.tools.help_limit_chars)
            .context("register tools")?;
        Self::new(model, tools, config.mode, config.max_transitions_per_turn)
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn tools(&self) -> &ToolBox<R> {
        &self.tools
    }

    /// Drive the conversation until the router ends the turn.
    ///
    /// `on_message` sees every appended message, in order, as soon as its
    /// transition completes.
    #[instrument(skip_all, fields(mode = ?self.mode, messages = state.messages().len()))]
    pub fn run_turn(
        &self,
        state: &ConversationState,
        mut on_message: impl FnMut(&Message),
    ) -> Result<TurnOutcome, TurnFailure> {
        let first_new = state.messages().len();
        let mut current = state.clone();
        let mut transitions = 0;

        loop {
            let next_route = route(&current, self.mode);
            debug!(route = ?next_route, transitions, "routing");
            if next_route == Route::EndTurn {
                info!(transitions, "turn ended");
                return Ok(TurnOutcome {
                    state: current,
                    transitions,
                    stop: TurnStop::Ended,
                    first_new,
                });
            }
            if transitions >= self.max_transitions {
                warn!(limit = self.max_transitions, "transition limit reached");
                return Ok(TurnOutcome {
                    state: current,
                    transitions,
                    stop: TurnStop::TransitionLimit {
                        limit: self.max_transitions,
                    },
                    first_new,
                });
            }
            transitions += 1;

            let before = current.messages().len();
            let next = match self.transition(next_route, &current) {
                Ok(next) => next,
                Err(error) => {
                    warn!(route = ?next_route, err = %format!("{error:#}"), "transition failed");
                    return Err(TurnFailure {
                        state: current,
                        error,
                    });
                }
            };
            for msg in &next.messages()[before..] {
                on_message(msg);
            }
            current = next;
        }
    }

    fn transition(&self, next_route: Route, state: &ConversationState) -> Result<ConversationState> {
        match next_route {
            Route::BuildPlan => self.planner.run(&self.model, state),
            Route::ExecuteStep => self.steps.run(&self.model, state),
            Route::InvokeTools => Ok(self.invoke_tools(state)),
            Route::CallModel => self.call_model(state),
            Route::EndTurn => Ok(state.clone()),
        }
    }

    /// Answer every pending tool call, in order.
    fn invoke_tools(&self, state: &ConversationState) -> ConversationState {
        let mut next = state.clone();
        for call in state.pending_tool_calls() {
            let result = self.tools.dispatch(call, state.approved_commands());
            next.push(Message::tool_result(call, result));
        }
        next
    }

    fn call_model(&self, state: &ConversationState) -> Result<ConversationState> {
        let completion =
            CompletionRequest::new(self.assistant_prompt.clone(), state.messages().to_vec())
                .with_tools(self.tools.definitions());
        let reply = self.model.complete(&completion).context("request response")?;
        let mut next = state.clone();
        next.push(reply);
        Ok(next)
    }
}
