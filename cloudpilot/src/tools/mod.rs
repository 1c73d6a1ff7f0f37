//! Tools offered to the model and the dispatch that runs them.
//!
//! Every call is validated against its JSON Schema before anything runs.
//! Failures of any kind come back as [`ToolResult`] values so the turn keeps
//! going and the model sees what happened.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::command::GateError;
use crate::core::policy::CommandPolicy;
use crate::core::types::{ToolCallRequest, ToolResult};

pub mod invoker;
pub mod sandbox;

use invoker::CommandRunner;
use sandbox::CodeSandbox;

pub const GET_TOOL_HELP: &str = "get_tool_help";
pub const LIST_AVAILABLE_COMMANDS: &str = "list_available_commands";
pub const EXECUTE_CODE: &str = "execute_code";

const TRUNCATION_NOTICE: &str = "...\n(Output truncated for brevity)";

static HELP_TOPIC_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9 _.\-]*$").expect("help topic pattern is valid")
});

/// Tool description handed to the model (JSON Schema parameters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Name of the command tool for `program`.
pub fn run_tool_name(program: &str) -> String {
    format!("run_{program}_command")
}

#[derive(Debug, Clone)]
enum ToolKind {
    RunCommand { program: String },
    Help,
    ListCommands,
    ExecuteCode,
}

struct RegisteredTool {
    kind: ToolKind,
    definition: ToolDefinition,
    validator: Validator,
}

/// Registered tools plus what they need to run.
pub struct ToolBox<R> {
    policy: Arc<CommandPolicy>,
    runner: R,
    sandbox: Option<CodeSandbox>,
    help_limit_chars: usize,
    tools: BTreeMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl<R: CommandRunner> ToolBox<R> {
    /// Register one command tool per policy program, the help and listing
    /// tools, and `execute_code` when a sandbox is given.
    pub fn new(
        policy: Arc<CommandPolicy>,
        runner: R,
        sandbox: Option<CodeSandbox>,
        help_limit_chars: usize,
    ) -> Result<Self> {
        let mut toolbox = Self {
            policy: Arc::clone(&policy),
            runner,
            sandbox: None,
            help_limit_chars,
            tools: BTreeMap::new(),
            order: Vec::new(),
        };

        for (program, program_policy) in policy.programs() {
            toolbox.register(
                ToolKind::RunCommand {
                    program: program.to_string(),
                },
                ToolDefinition {
                    name: run_tool_name(program),
                    description: format!(
                        "Run a {} command. The command must start with '{program} ' followed by \
                         one of the allowed categories: {}.",
                        program_policy.description,
                        program_policy.categories.join(", ")
                    ),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "command": {
                                "type": "string",
                                "description": format!("Full command line, e.g. '{program} ...'"),
                            }
                        },
                        "required": ["command"],
                        "additionalProperties": false,
                    }),
                },
            )?;
        }

        let programs: Vec<&str> = policy.programs().map(|(name, _)| name).collect();
        toolbox.register(
            ToolKind::Help,
            ToolDefinition {
                name: GET_TOOL_HELP.to_string(),
                description: "Show the --help output of a tool, optionally for a specific \
                              command topic (e.g. 'compute instances')."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "tool": {"type": "string", "enum": programs},
                        "topic": {"type": "string"},
                    },
                    "additionalProperties": false,
                }),
            },
        )?;
        toolbox.register(
            ToolKind::ListCommands,
            ToolDefinition {
                name: LIST_AVAILABLE_COMMANDS.to_string(),
                description: "List the allowed command categories with examples, for one tool \
                              or for all tools."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "tool": {"type": "string"},
                    },
                    "additionalProperties": false,
                }),
            },
        )?;

        if let Some(sandbox) = sandbox {
            toolbox.register(
                ToolKind::ExecuteCode,
                ToolDefinition {
                    name: EXECUTE_CODE.to_string(),
                    description: "Evaluate a Rhai script in a restricted sandbox and return \
                                  everything it printed. Useful for calculations and for \
                                  reshaping command output."
                        .to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "code": {"type": "string"},
                        },
                        "required": ["code"],
                        "additionalProperties": false,
                    }),
                },
            )?;
            toolbox.sandbox = Some(sandbox);
        }

        Ok(toolbox)
    }

    fn register(&mut self, kind: ToolKind, definition: ToolDefinition) -> Result<()> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&definition.parameters)
            .with_context(|| format!("compile schema for tool {}", definition.name))?;
        self.order.push(definition.name.clone());
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                kind,
                definition,
                validator,
            },
        );
        Ok(())
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub fn sandbox_enabled(&self) -> bool {
        self.sandbox.is_some()
    }

    /// Run one tool call. Never fails; problems become result values.
    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.id))]
    pub fn dispatch(&self, call: &ToolCallRequest, approved: &BTreeSet<String>) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!("unknown tool requested");
            return ToolResult::error(format!("Unknown tool: {}", call.name));
        };

        let arguments = Value::Object(
            call.arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let violations: Vec<String> = tool
            .validator
            .iter_errors(&arguments)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            warn!(violations = violations.len(), "tool arguments failed validation");
            return ToolResult::error(format!(
                "invalid arguments for {}: {}",
                call.name,
                violations.join("; ")
            ));
        }

        let result = match &tool.kind {
            ToolKind::RunCommand { program } => {
                self.run_command(program, call.arg_str("command").unwrap_or_default(), approved)
            }
            ToolKind::Help => self.help(call.arg_str("tool"), call.arg_str("topic")),
            ToolKind::ListCommands => match self.policy.describe(call.arg_str("tool")) {
                Ok(text) => ToolResult::success(text),
                Err(message) => ToolResult::error(message),
            },
            ToolKind::ExecuteCode => match &self.sandbox {
                Some(sandbox) => sandbox.evaluate(call.arg_str("code").unwrap_or_default()),
                None => ToolResult::error("code execution is disabled"),
            },
        };
        debug!(success = result.is_success(), "tool finished");
        result
    }

    fn run_command(&self, program: &str, raw: &str, approved: &BTreeSet<String>) -> ToolResult {
        match self.policy.check(raw, program, approved) {
            Ok(parsed) => invoker::invoke(&self.runner, &parsed),
            Err(GateError::ConfirmationRequired { command, keyword }) => {
                info!(
                    target: "cloudpilot::audit",
                    command = %command,
                    keyword = %keyword,
                    "command held for confirmation"
                );
                ToolResult::ConfirmationRequired { command, keyword }
            }
            Err(err) => {
                info!(target: "cloudpilot::audit", command = %raw.trim(), reason = %err, "command rejected");
                ToolResult::rejected(err.to_string())
            }
        }
    }

    fn help(&self, tool: Option<&str>, topic: Option<&str>) -> ToolResult {
        let program = match tool {
            Some(name) => name,
            None => match self.policy.programs().next() {
                Some((name, _)) => name,
                None => return ToolResult::error("no tools are configured"),
            },
        };
        if self.policy.program(program).is_none() {
            return ToolResult::error(self.policy.invalid_program(program));
        }

        let topic = topic.map(str::trim).unwrap_or_default();
        if !HELP_TOPIC_RE.is_match(topic) {
            return ToolResult::rejected(format!(
                "help topic '{topic}' may only contain letters, digits, spaces, '_', '.' and '-'"
            ));
        }

        let line = if topic.is_empty() {
            format!("{program} --help")
        } else {
            format!("{program} {topic} --help")
        };
        match invoker::run_line(&self.runner, &line) {
            ToolResult::Success { output } => {
                ToolResult::success(truncate_chars(&output, self.help_limit_chars))
            }
            ToolResult::ExecutionError { message } => {
                ToolResult::error(format!("could not get help: {message}"))
            }
            other => other,
        }
    }
}

/// Cut `text` to `limit` characters, appending a notice when anything was dropped.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{TRUNCATION_NOTICE}", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::SandboxConfig;
    use crate::test_support::ScriptedRunner;
    use invoker::ProcessOutput;

    fn toolbox(runner: ScriptedRunner, sandbox: bool) -> ToolBox<ScriptedRunner> {
        let sandbox = sandbox.then(|| CodeSandbox::from_config(&SandboxConfig::default()));
        ToolBox::new(Arc::new(CommandPolicy::gcloud()), runner, sandbox, 2000).expect("toolbox")
    }

    fn run(command: &str) -> ToolCallRequest {
        ToolCallRequest::new("call-1", "run_gcloud_command").with_arg("command", command)
    }

    #[test]
    fn definitions_follow_registration_order() {
        let names: Vec<String> = toolbox(ScriptedRunner::new(), true)
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "run_gcloud_command",
                "get_tool_help",
                "list_available_commands",
                "execute_code"
            ]
        );
    }

    #[test]
    fn sandbox_tool_is_absent_when_disabled() {
        let tools = toolbox(ScriptedRunner::new(), false);
        assert!(!tools.sandbox_enabled());
        let result = tools.dispatch(
            &ToolCallRequest::new("c", EXECUTE_CODE).with_arg("code", "print(1);"),
            &BTreeSet::new(),
        );
        assert_eq!(result, ToolResult::error("Unknown tool: execute_code"));
    }

    #[test]
    fn allowed_command_runs() {
        let runner = ScriptedRunner::new().respond(ProcessOutput::success("my-project\n"));
        let tools = toolbox(runner, false);
        let result = tools.dispatch(&run("gcloud projects list"), &BTreeSet::new());
        assert_eq!(result, ToolResult::success("my-project\n"));
    }

    #[test]
    fn malformed_command_never_reaches_runner() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let result = tools.dispatch(&run("ls -la"), &BTreeSet::new());
        assert!(matches!(result, ToolResult::SafetyRejected { .. }));
        assert!(tools.runner.calls().is_empty());
    }

    #[test]
    fn destructive_command_is_held_without_running() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let result = tools.dispatch(
            &run("gcloud compute instances delete vm-1"),
            &BTreeSet::new(),
        );
        assert_eq!(
            result,
            ToolResult::ConfirmationRequired {
                command: "gcloud compute instances delete vm-1".to_string(),
                keyword: "delete".to_string(),
            }
        );
        assert!(tools.runner.calls().is_empty());
    }

    #[test]
    fn shell_chaining_and_quoting_cannot_slip_past_the_gate() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let none = BTreeSet::new();

        for raw in [
            "gcloud compute instances delete; ",
            "gcloud config list; rm -rf /tmp/x",
            "gcloud config list && gcloud billing accounts list",
        ] {
            let result = tools.dispatch(&run(raw), &none);
            assert!(
                matches!(result, ToolResult::SafetyRejected { .. }),
                "{raw}: {result:?}"
            );
        }

        let result = tools.dispatch(&run("gcloud compute instances dele''te vm-1"), &none);
        assert_eq!(
            result,
            ToolResult::ConfirmationRequired {
                command: "gcloud compute instances delete vm-1".to_string(),
                keyword: "delete".to_string(),
            }
        );
        assert!(tools.runner.calls().is_empty());
    }

    #[test]
    fn quoted_arguments_reach_the_shell_as_single_tokens() {
        let tools = toolbox(ScriptedRunner::new(), false);
        tools.dispatch(
            &run("gcloud compute instances list --filter=\"name:web$(id)\""),
            &BTreeSet::new(),
        );
        let calls = tools.runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            shlex::split(&calls[0]).expect("shell words"),
            vec![
                "gcloud",
                "compute",
                "instances",
                "list",
                "--filter=name:web$(id)"
            ]
        );
    }

    #[test]
    fn approved_destructive_command_runs() {
        let runner = ScriptedRunner::new().respond(ProcessOutput::success(""));
        let tools = toolbox(runner, false);
        let approved = BTreeSet::from(["gcloud compute instances delete vm-1".to_string()]);
        let result = tools.dispatch(&run("gcloud compute instances delete vm-1"), &approved);
        assert_eq!(result, ToolResult::success(invoker::NO_OUTPUT));
    }

    #[test]
    fn schema_violations_are_execution_errors() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let missing = tools.dispatch(
            &ToolCallRequest::new("c", "run_gcloud_command"),
            &BTreeSet::new(),
        );
        assert!(matches!(
            missing,
            ToolResult::ExecutionError { message } if message.starts_with("invalid arguments")
        ));
        let wrong_type = tools.dispatch(
            &ToolCallRequest::new("c", "run_gcloud_command").with_arg("command", 5),
            &BTreeSet::new(),
        );
        assert!(matches!(wrong_type, ToolResult::ExecutionError { .. }));
    }

    #[test]
    fn unknown_tool_is_an_execution_error() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let result = tools.dispatch(&ToolCallRequest::new("c", "rm_rf"), &BTreeSet::new());
        assert_eq!(result, ToolResult::error("Unknown tool: rm_rf"));
    }

    #[test]
    fn help_is_truncated() {
        let long = "x".repeat(2500);
        let runner = ScriptedRunner::new().respond(ProcessOutput::success(long));
        let tools = toolbox(runner, false);
        let result = tools.dispatch(
            &ToolCallRequest::new("c", GET_TOOL_HELP).with_arg("topic", "compute instances"),
            &BTreeSet::new(),
        );
        let ToolResult::Success { output } = result else {
            panic!("expected success");
        };
        assert!(output.ends_with(TRUNCATION_NOTICE));
        assert_eq!(output.len(), 2000 + TRUNCATION_NOTICE.len());
        assert_eq!(
            tools.runner.calls(),
            vec!["gcloud compute instances --help"]
        );
    }

    #[test]
    fn help_topic_with_shell_syntax_is_rejected() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let result = tools.dispatch(
            &ToolCallRequest::new("c", GET_TOOL_HELP).with_arg("topic", "compute; rm -rf /"),
            &BTreeSet::new(),
        );
        assert!(matches!(result, ToolResult::SafetyRejected { .. }));
        assert!(tools.runner.calls().is_empty());
    }

    #[test]
    fn help_for_unconfigured_tool_is_a_schema_error() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let result = tools.dispatch(
            &ToolCallRequest::new("c", GET_TOOL_HELP).with_arg("tool", "aws"),
            &BTreeSet::new(),
        );
        assert!(matches!(result, ToolResult::ExecutionError { .. }));
    }

    #[test]
    fn list_commands_for_unknown_tool_names_valid_ones() {
        let tools = toolbox(ScriptedRunner::new(), false);
        let result = tools.dispatch(
            &ToolCallRequest::new("c", LIST_AVAILABLE_COMMANDS).with_arg("tool", "aws"),
            &BTreeSet::new(),
        );
        assert_eq!(
            result,
            ToolResult::error("Invalid tool 'aws'. Valid tools are: gcloud")
        );
    }

    #[test]
    fn execute_code_goes_through_sandbox() {
        let tools = toolbox(ScriptedRunner::new(), true);
        let result = tools.dispatch(
            &ToolCallRequest::new("c", EXECUTE_CODE).with_arg("code", "print(1 + 2);"),
            &BTreeSet::new(),
        );
        assert_eq!(result, ToolResult::success("3\n"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), format!("hé{TRUNCATION_NOTICE}"));
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
