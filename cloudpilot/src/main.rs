//! Cloud CLI agent.
//!
//! Turns natural-language requests into `gcloud` (and optionally `gsutil`,
//! `bq`, `kubectl`) invocations, gated by a command policy, and relays the
//! results. Configuration lives in `.cloudpilot/config.toml`.

use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use cloudpilot::core::command::GateError;
use cloudpilot::core::types::{ConversationState, Message, MessageKind, Role, ToolResult};
use cloudpilot::exit_codes;
use cloudpilot::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config, write_atomic, write_config};
use cloudpilot::io::model::{CommandModel, is_model_unavailable};
use cloudpilot::logging;
use cloudpilot::tools::invoker::ShellRunner;
use cloudpilot::tools::sandbox::CodeSandbox;
use cloudpilot::turn::{Agent, TurnOutcome, TurnStop};

#[derive(Parser)]
#[command(
    name = "cloudpilot",
    version,
    about = "Conversational agent for cloud command-line tools"
)]
struct Cli {
    /// Config file path.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        /// Multi-tool profile: gcloud, gsutil, bq and kubectl, direct mode, no sandbox.
        #[arg(long)]
        suite: bool,
    },
    /// Run a single request and print the conversation as it unfolds.
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Write the final conversation as JSON.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    /// Interactive session over stdin.
    Chat,
    /// Check a command against the policy without running it.
    Check {
        /// Program the command is for.
        #[arg(long, default_value = "gcloud")]
        tool: String,
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// List allowed command categories.
    Commands {
        #[arg(long)]
        tool: Option<String>,
    },
    /// Evaluate a snippet in the code sandbox.
    Eval { code: String },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            if is_model_unavailable(&err) {
                exit_codes::MODEL_UNAVAILABLE
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, suite } => cmd_init(&cli.config, force, suite),
        Command::Ask { query, transcript } => {
            cmd_ask(&cli.config, &query.join(" "), transcript.as_deref())
        }
        Command::Chat => cmd_chat(&cli.config),
        Command::Check { tool, command } => cmd_check(&cli.config, &tool, &command.join(" ")),
        Command::Commands { tool } => cmd_commands(&cli.config, tool.as_deref()),
        Command::Eval { code } => cmd_eval(&cli.config, &code),
    }
}

fn cmd_init(path: &Path, force: bool, suite: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let cfg = if suite {
        AgentConfig::cloud_suite()
    } else {
        AgentConfig::default()
    };
    write_config(path, &cfg).with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn build_agent(config: &AgentConfig) -> Result<Agent<CommandModel, ShellRunner>> {
    let model = CommandModel::from_config(&config.model);
    let runner = ShellRunner::new(
        Duration::from_secs(config.tools.timeout_secs),
        config.tools.output_limit_bytes,
    );
    Agent::from_config(config, model, runner)
}

fn cmd_ask(config_path: &Path, query: &str, transcript: Option<&Path>) -> Result<i32> {
    let config = load_config(config_path)?;
    let agent = build_agent(&config)?;

    let mut state = ConversationState::new();
    state.begin_request(query);
    print_message(&state.messages()[0]);

    match agent.run_turn(&state, print_message) {
        Ok(outcome) => {
            report_stop(&outcome);
            if let Some(path) = transcript {
                write_json(path, &outcome.state)?;
            }
            Ok(exit_codes::OK)
        }
        Err(failure) => {
            if let Some(path) = transcript {
                write_json(path, &failure.state)?;
            }
            Err(anyhow::Error::new(failure))
        }
    }
}

fn cmd_chat(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let agent = build_agent(&config)?;
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let mut state = ConversationState::new();

    println!("cloudpilot ({:?} mode). Type 'exit' to quit.", agent.mode());
    loop {
        let Some(line) = prompt(&mut lines, "> ")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        state.begin_request(line);
        let mut outcome = match agent.run_turn(&state, print_message) {
            Ok(outcome) => outcome,
            Err(failure) => {
                eprintln!("{}", failure);
                state = failure.state;
                continue;
            }
        };

        // Ask about held commands; approved ones are retried in a follow-up turn.
        loop {
            report_stop(&outcome);
            let requests: Vec<String> = outcome
                .confirmation_requests()
                .iter()
                .map(|(command, _)| command.to_string())
                .collect();
            state = outcome.state;

            let mut approved = Vec::new();
            for command in requests {
                let answer = prompt(&mut lines, &format!("Run `{command}`? [y/N] "))?;
                if answer.is_some_and(|a| a.trim().eq_ignore_ascii_case("y")) {
                    state.approve_command(&command);
                    approved.push(command);
                }
            }
            if approved.is_empty() {
                break;
            }

            let follow_up = format!(
                "I confirm. Please run: {}",
                approved
                    .iter()
                    .map(|c| format!("`{c}`"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            state.push_follow_up(follow_up);
            outcome = match agent.run_turn(&state, print_message) {
                Ok(outcome) => outcome,
                Err(failure) => {
                    eprintln!("{}", failure);
                    state = failure.state;
                    break;
                }
            };
        }
    }
    Ok(exit_codes::OK)
}

fn prompt<I>(lines: &mut I, text: &str) -> Result<Option<String>>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    print!("{text}");
    std::io::stdout().flush().context("flush stdout")?;
    lines.next().transpose().context("read stdin")
}

fn cmd_check(config_path: &Path, tool: &str, raw: &str) -> Result<i32> {
    let config = load_config(config_path)?;
    let policy = config.tools.policy();
    match policy.check(raw, tool, &BTreeSet::new()) {
        Ok(parsed) => {
            println!("allowed: {}", parsed.command_line());
            Ok(exit_codes::OK)
        }
        Err(GateError::ConfirmationRequired { command, keyword }) => {
            println!("confirmation required: '{keyword}' in {command}");
            Ok(exit_codes::NEEDS_CONFIRMATION)
        }
        Err(err) => {
            println!("rejected: {err}");
            Ok(exit_codes::REJECTED)
        }
    }
}

fn cmd_commands(config_path: &Path, tool: Option<&str>) -> Result<i32> {
    let config = load_config(config_path)?;
    match config.tools.policy().describe(tool) {
        Ok(text) => {
            println!("{text}");
            Ok(exit_codes::OK)
        }
        Err(message) => bail!(message),
    }
}

fn cmd_eval(config_path: &Path, code: &str) -> Result<i32> {
    let config = load_config(config_path)?;
    if !config.sandbox.enabled {
        bail!("code sandbox is disabled in {}", config_path.display());
    }
    match CodeSandbox::from_config(&config.sandbox).evaluate(code) {
        ToolResult::Success { output } => {
            print!("{output}");
            if !output.ends_with('\n') {
                println!();
            }
            Ok(exit_codes::OK)
        }
        rejected @ ToolResult::SafetyRejected { .. } => {
            eprintln!("{}", rejected.render());
            Ok(exit_codes::REJECTED)
        }
        other => {
            eprintln!("{}", other.render());
            Ok(exit_codes::INVALID)
        }
    }
}

fn print_message(msg: &Message) {
    match &msg.kind {
        MessageKind::Text => {
            if !msg.content.is_empty() {
                let who = match msg.role {
                    Role::User => "you",
                    _ => "cloudpilot",
                };
                println!("{who}: {}", msg.content);
            }
        }
        MessageKind::ToolCalls { calls } => {
            if !msg.content.trim().is_empty() {
                println!("cloudpilot: {}", msg.content);
            }
            for call in calls {
                let args = serde_json::to_string(&call.arguments).unwrap_or_default();
                println!("  -> {} {args}", call.name);
            }
        }
        MessageKind::ToolResult { tool_name, .. } => {
            println!("  <- {tool_name}:\n{}", indent(&msg.content));
        }
    }
}

fn indent(text: &str) -> String {
    text.trim_end()
        .lines()
        .map(|line| format!("     {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn report_stop(outcome: &TurnOutcome) {
    if let TurnStop::TransitionLimit { limit } = outcome.stop {
        eprintln!("stopped after {limit} steps without finishing; send another message to continue");
    }
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    write_atomic(path, &payload).with_context(|| format!("write {}", path.display()))
}
