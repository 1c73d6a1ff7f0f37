//! System prompt rendering.
//!
//! Templates are compiled into the binary and rendered with minijinja against
//! the active policy and tool set.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::policy::CommandPolicy;
use crate::tools::ToolDefinition;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const ASSISTANT_TEMPLATE: &str = include_str!("prompts/assistant.md");
const STEP_TEMPLATE: &str = include_str!("prompts/step.md");

#[derive(Debug, Clone, Serialize)]
struct ProgramContext {
    name: String,
    description: String,
    categories: Vec<String>,
}

/// Everything the templates can reference.
#[derive(Debug, Clone, Serialize)]
pub struct PromptInputs {
    programs: Vec<ProgramContext>,
    destructive_keywords: Vec<String>,
    tools: Vec<ToolDefinition>,
    sandbox_functions: Vec<String>,
}

impl PromptInputs {
    pub fn new(
        policy: &CommandPolicy,
        tools: Vec<ToolDefinition>,
        sandbox_functions: Vec<String>,
    ) -> Self {
        Self {
            programs: policy
                .programs()
                .map(|(name, program)| ProgramContext {
                    name: name.to_string(),
                    description: program.description.clone(),
                    categories: program.categories.clone(),
                })
                .collect(),
            destructive_keywords: policy.destructive_keywords().iter().cloned().collect(),
            tools,
            sandbox_functions,
        }
    }
}

/// Rendered system prompts, built once per agent.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    pub planner: String,
    pub assistant: String,
    pub step: String,
}

impl PromptLibrary {
    pub fn render(inputs: &PromptInputs) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        env.add_template("assistant", ASSISTANT_TEMPLATE)
            .context("load assistant template")?;
        env.add_template("step", STEP_TEMPLATE)
            .context("load step template")?;

        let ctx = context! {
            programs => &inputs.programs,
            destructive_keywords => &inputs.destructive_keywords,
            tools => &inputs.tools,
            sandbox_functions => &inputs.sandbox_functions,
        };
        let render = |name: &str| -> Result<String> {
            let rendered = env
                .get_template(name)?
                .render(&ctx)
                .with_context(|| format!("render {name} prompt"))?;
            Ok(rendered.trim().to_string())
        };

        let library = Self {
            planner: render("planner")?,
            assistant: render("assistant")?,
            step: render("step")?,
        };
        debug!(
            planner_bytes = library.planner.len(),
            assistant_bytes = library.assistant.len(),
            step_bytes = library.step.len(),
            "rendered prompts"
        );
        Ok(library)
    }
}
