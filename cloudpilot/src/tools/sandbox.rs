//! Evaluates model-written Rhai snippets in a restricted engine.
//!
//! The marker filter is a plain substring scan and is easy to get around; the
//! real confinement comes from the engine: no module loading, no `eval`, no
//! file/network/process functions registered, and operation limits.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult};
use tracing::{debug, info, warn};

use crate::core::types::ToolResult;
use crate::io::config::SandboxConfig;

pub const NO_OUTPUT: &str = "Code executed successfully (no output)";

/// Functions registered on top of the Rhai standard package.
pub const SANDBOX_FUNCTIONS: &[&str] = &[
    "rand_int(lo, hi)",
    "rand_float()",
    "now_utc()",
    "unix_time()",
    "json_parse(text)",
    "json_stringify(value)",
    "regex_is_match(pattern, text)",
    "regex_find_all(pattern, text)",
    "regex_replace(pattern, text, replacement)",
    "print(value)",
];

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

#[derive(Debug, Clone)]
pub struct CodeSandbox {
    denied_markers: Vec<String>,
    max_operations: u64,
}

impl CodeSandbox {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            denied_markers: config.denied_markers.clone(),
            max_operations: config.max_operations,
        }
    }

    /// First denied marker contained in `code`.
    pub fn denied_marker(&self, code: &str) -> Option<&str> {
        self.denied_markers
            .iter()
            .map(String::as_str)
            .find(|marker| code.contains(marker))
    }

    /// Filter, then run `code` in a fresh engine and return what it printed.
    pub fn evaluate(&self, code: &str) -> ToolResult {
        if let Some(marker) = self.denied_marker(code) {
            warn!(marker, "snippet rejected before evaluation");
            return ToolResult::rejected(format!(
                "code contains a restricted operation ('{marker}')"
            ));
        }

        info!(target: "cloudpilot::audit", bytes = code.len(), "evaluating snippet");
        let captured = Arc::new(Mutex::new(String::new()));
        let engine = self.engine(&captured);

        if let Err(err) = engine.run(code) {
            debug!(err = %err, "snippet failed");
            return ToolResult::error(err.to_string());
        }

        let output = captured.lock().map(|buf| buf.clone()).unwrap_or_default();
        if output.trim().is_empty() {
            ToolResult::success(NO_OUTPUT)
        } else {
            ToolResult::success(output)
        }
    }

    fn engine(&self, captured: &Arc<Mutex<String>>) -> Engine {
        let mut engine = Engine::new();

        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.disable_symbol("import");

        engine.set_max_operations(self.max_operations);
        engine.set_max_call_levels(32);
        engine.set_max_expr_depths(64, 32);
        engine.set_max_string_size(1_000_000);
        engine.set_max_array_size(100_000);
        engine.set_max_map_size(100_000);

        let sink = Arc::clone(captured);
        engine.on_print(move |text| append_line(&sink, text));
        let sink = Arc::clone(captured);
        engine.on_debug(move |text, _source, _pos| append_line(&sink, text));

        engine.register_fn("rand_int", rand_int);
        engine.register_fn("rand_float", || rand::thread_rng().r#gen::<f64>());
        engine.register_fn("now_utc", || Utc::now().to_rfc3339());
        engine.register_fn("unix_time", || Utc::now().timestamp());
        engine.register_fn("json_parse", json_parse);
        engine.register_fn("json_stringify", json_stringify);
        engine.register_fn("regex_is_match", regex_is_match);
        engine.register_fn("regex_find_all", regex_find_all);
        engine.register_fn("regex_replace", regex_replace);

        engine
    }
}

fn append_line(sink: &Mutex<String>, text: &str) {
    if let Ok(mut buf) = sink.lock() {
        buf.push_str(text);
        buf.push('\n');
    }
}

fn rand_int(lo: i64, hi: i64) -> RhaiResult<i64> {
    if lo > hi {
        return Err(format!("rand_int: empty range {lo}..={hi}").into());
    }
    Ok(rand::thread_rng().gen_range(lo..=hi))
}

fn json_parse(text: &str) -> RhaiResult<Dynamic> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("json_parse: {e}"))?;
    rhai::serde::to_dynamic(value)
}

fn json_stringify(value: Dynamic) -> RhaiResult<String> {
    let value: serde_json::Value = rhai::serde::from_dynamic(&value)?;
    serde_json::to_string(&value).map_err(|e| format!("json_stringify: {e}").into())
}

fn compile(pattern: &str) -> RhaiResult<regex::Regex> {
    regex::Regex::new(pattern).map_err(|e| e.to_string().into())
}

fn regex_is_match(pattern: &str, text: &str) -> RhaiResult<bool> {
    Ok(compile(pattern)?.is_match(text))
}

fn regex_find_all(pattern: &str, text: &str) -> RhaiResult<Array> {
    Ok(compile(pattern)?
        .find_iter(text)
        .map(|m| Dynamic::from(m.as_str().to_string()))
        .collect())
}

fn regex_replace(pattern: &str, text: &str, replacement: &str) -> RhaiResult<String> {
    Ok(compile(pattern)?.replace_all(text, replacement).into_owned())
}
