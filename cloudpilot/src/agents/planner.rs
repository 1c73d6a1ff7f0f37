//! Plan builder: turns the latest user request into ordered steps.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::plan_parser::parse_plan;
use crate::core::types::{ConversationState, Message};
use crate::io::model::{CompletionRequest, ModelClient};

/// Plan builder agent; owns the rendered planning prompt.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    system_prompt: String,
}

impl PlanBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Ask the model for a plan for the latest user message.
    ///
    /// Without any user message the plan is empty and no model call is made.
    #[instrument(skip_all, fields(messages = state.messages().len()))]
    pub fn run<M: ModelClient>(
        &self,
        model: &M,
        state: &ConversationState,
    ) -> Result<ConversationState> {
        let mut next = state.clone();
        let Some(request) = state.latest_user_message() else {
            debug!("no user message to plan for");
            next.set_plan(Vec::new());
            return Ok(next);
        };

        let completion = CompletionRequest::new(
            self.system_prompt.clone(),
            vec![Message::user(request.content.clone())],
        );
        let reply = model.complete(&completion).context("request plan")?;
        let parsed = parse_plan(&reply.content);
        info!(
            steps = parsed.steps.len(),
            strategy = ?parsed.strategy,
            "plan created"
        );

        if !parsed.steps.is_empty() {
            next.push(Message::assistant(plan_summary(&parsed.steps)));
        }
        next.set_plan(parsed.steps);
        Ok(next)
    }
}

/// Summary shown to the user once a plan exists.
pub fn plan_summary(steps: &[String]) -> String {
    let numbered = steps
        .iter()
        .enumerate()
        .map(|(idx, step)| format!("{}. {step}", idx + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "I'll help you with this request. Here's my plan:\n\n{numbered}\n\n\
         I'll start working on this step by step."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::test_support::ScriptedModel;

    #[test]
    fn numbered_reply_becomes_plan() {
        let model = ScriptedModel::new().text("1. A\n2. B\n3. C");
        let mut state = ConversationState::new();
        state.begin_request("do three things");

        let next = PlanBuilder::new("plan it").run(&model, &state).expect("plan");

        assert_eq!(next.plan(), ["A", "B", "C"]);
        assert_eq!(next.current_step(), Some(0));
        assert!(next.plan_created());
        let summary = next.last_message().expect("summary");
        assert_eq!(summary.role, Role::Assistant);
        assert_eq!(
            summary.content,
            "I'll help you with this request. Here's my plan:\n\n1. A\n2. B\n3. C\n\n\
             I'll start working on this step by step."
        );
    }

    #[test]
    fn model_sees_only_system_prompt_and_request() {
        let model = ScriptedModel::new().text("1. Run gsutil ls");
        let mut state = ConversationState::new();
        state.push_follow_up("earlier chatter");
        state.push(Message::assistant("earlier answer"));
        state.begin_request("list my buckets");

        PlanBuilder::new("plan it").run(&model, &state).expect("plan");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let sent: Vec<&str> = requests[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(sent, vec!["plan it", "list my buckets"]);
        assert!(requests[0].tools.is_empty());
    }

    #[test]
    fn no_user_message_yields_empty_plan_without_model_call() {
        let model = ScriptedModel::new();
        let next = PlanBuilder::new("plan it")
            .run(&model, &ConversationState::new())
            .expect("plan");
        assert!(next.plan_created());
        assert!(next.plan().is_empty());
        assert_eq!(next.current_step(), None);
        assert!(model.requests().is_empty());
    }

    #[test]
    fn blank_reply_appends_nothing() {
        let model = ScriptedModel::new().text("   ");
        let mut state = ConversationState::new();
        state.begin_request("hello");
        let next = PlanBuilder::new("plan it").run(&model, &state).expect("plan");
        assert_eq!(next.messages().len(), 1);
        assert!(next.plan_created());
        assert_eq!(next.current_step(), None);
    }

    #[test]
    fn model_failure_leaves_input_untouched() {
        let model = ScriptedModel::new().unavailable("offline");
        let mut state = ConversationState::new();
        state.begin_request("hello");
        let before = state.clone();
        assert!(PlanBuilder::new("plan it").run(&model, &state).is_err());
        assert_eq!(state, before);
    }
}
