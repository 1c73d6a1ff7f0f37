//! Pure routing decision: which component handles the conversation next.

use crate::core::types::{AgentMode, ConversationState, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Decompose the latest user request into a plan.
    BuildPlan,
    /// Dispatch unanswered tool calls.
    InvokeTools,
    /// Ask the model to respond (tool results or open chat).
    CallModel,
    /// Run the step at `current_step`.
    ExecuteStep,
    EndTurn,
}

/// Decide the next route. Rules are evaluated in order; the first match wins.
///
/// Tool handling sits ahead of step continuation so that calls issued while a
/// step runs are answered before the next step starts.
pub fn route(state: &ConversationState, mode: AgentMode) -> Route {
    let last_role = state.last_message().map(|msg| msg.role);

    if mode == AgentMode::Planned && !state.plan_created() && last_role == Some(Role::User) {
        return Route::BuildPlan;
    }
    if !state.pending_tool_calls().is_empty() {
        return Route::InvokeTools;
    }
    if state
        .last_message()
        .is_some_and(|msg| msg.tool_result_ref().is_some())
    {
        return Route::CallModel;
    }
    if state.has_pending_step() {
        return Route::ExecuteStep;
    }
    if last_role == Some(Role::User) {
        return Route::CallModel;
    }
    Route::EndTurn
}
