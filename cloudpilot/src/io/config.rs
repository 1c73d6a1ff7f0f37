//! Agent configuration stored under `.cloudpilot/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::{CommandPolicy, PolicyPreset};
use crate::core::types::AgentMode;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".cloudpilot/config.toml";

/// Agent configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// `planned` decomposes each request first; `direct` goes straight to the model.
    pub mode: AgentMode,

    /// Upper bound on router transitions in a single turn.
    pub max_transitions_per_turn: usize,

    pub model: ModelConfig,
    pub tools: ToolsConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Adapter command; receives the request JSON on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["cloudpilot-model".to_string()],
            timeout_secs: 120,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub preset: PolicyPreset,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// `get_tool_help` output is cut to this many characters.
    pub help_limit_chars: usize,
    /// Added to the preset's destructive keywords.
    pub extra_destructive_keywords: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            preset: PolicyPreset::Gcloud,
            timeout_secs: 30,
            output_limit_bytes: 100_000,
            help_limit_chars: 2000,
            extra_destructive_keywords: Vec::new(),
        }
    }
}

impl ToolsConfig {
    pub fn policy(&self) -> CommandPolicy {
        CommandPolicy::from_preset(self.preset)
            .with_destructive_keywords(&self.extra_destructive_keywords)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Registers the `execute_code` tool.
    pub enabled: bool,
    pub max_operations: u64,
    /// Snippets containing any of these substrings are refused unevaluated.
    pub denied_markers: Vec<String>,
}

pub const DEFAULT_DENIED_MARKERS: &[&str] = &[
    "os.system",
    "subprocess",
    "eval(",
    "exec(",
    "open(",
    "__import__",
    "importlib",
    "shutil",
    "socket",
    "requests",
    "urllib",
    "pathlib",
    "import ",
];

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_operations: 1_000_000,
            denied_markers: DEFAULT_DENIED_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::Planned,
            max_transitions_per_turn: 50,
            model: ModelConfig::default(),
            tools: ToolsConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Multi-tool console profile: every cloud CLI, no planning, no sandbox.
    pub fn cloud_suite() -> Self {
        Self {
            mode: AgentMode::Direct,
            tools: ToolsConfig {
                preset: PolicyPreset::CloudSuite,
                ..ToolsConfig::default()
            },
            sandbox: SandboxConfig {
                enabled: false,
                ..SandboxConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_transitions_per_turn == 0 {
            return Err(anyhow!("max_transitions_per_turn must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.tools.timeout_secs == 0 {
            return Err(anyhow!("tools.timeout_secs must be > 0"));
        }
        if self.tools.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }
        if self.tools.help_limit_chars == 0 {
            return Err(anyhow!("tools.help_limit_chars must be > 0"));
        }
        if self
            .tools
            .extra_destructive_keywords
            .iter()
            .any(|k| k.trim().is_empty() || k.contains(char::is_whitespace))
        {
            return Err(anyhow!(
                "tools.extra_destructive_keywords entries must be single non-empty tokens"
            ));
        }
        if self.sandbox.max_operations == 0 {
            return Err(anyhow!("sandbox.max_operations must be > 0"));
        }
        if self.sandbox.denied_markers.iter().any(String::is_empty) {
            return Err(anyhow!("sandbox.denied_markers must not contain empty strings"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
