//! Command policy: which programs and categories may run, and which tokens
//! need user confirmation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::core::command::{GateError, ParsedCommand, keyword_form, parse_command};
use crate::core::types::normalize_command_line;

/// Named policy presets selectable from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    /// `gcloud` only.
    #[default]
    Gcloud,
    /// `gcloud`, `gsutil`, `bq` and `kubectl`.
    CloudSuite,
}

/// Allowed categories for one program, with example invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramPolicy {
    pub description: String,
    pub categories: Vec<String>,
    #[serde(default)]
    pub examples: BTreeMap<String, String>,
}

impl ProgramPolicy {
    fn new(description: &str, categories: &[&str], examples: &[(&str, &str)]) -> Self {
        Self {
            description: description.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            examples: examples
                .iter()
                .map(|(category, example)| (category.to_string(), example.to_string()))
                .collect(),
        }
    }

    pub fn allows(&self, category: &str) -> bool {
        self.categories.iter().any(|allowed| allowed == category)
    }

    /// Examples in category declaration order.
    pub fn ordered_examples(&self) -> impl Iterator<Item = (&str, &str)> {
        self.categories.iter().filter_map(|category| {
            self.examples
                .get(category)
                .map(|example| (category.as_str(), example.as_str()))
        })
    }
}

/// Process-wide, read-only command policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    programs: BTreeMap<String, ProgramPolicy>,
    /// Program names in presentation order.
    order: Vec<String>,
    destructive_keywords: BTreeSet<String>,
}

const GCLOUD_DESTRUCTIVE: &[&str] = &["delete", "remove", "reset", "unset", "clear"];
const SUITE_DESTRUCTIVE: &[&str] = &["delete", "remove", "reset", "unset", "clear", "rm", "drop"];

impl CommandPolicy {
    pub fn from_preset(preset: PolicyPreset) -> Self {
        match preset {
            PolicyPreset::Gcloud => Self::gcloud(),
            PolicyPreset::CloudSuite => Self::cloud_suite(),
        }
    }

    pub fn gcloud() -> Self {
        Self::builder(GCLOUD_DESTRUCTIVE).with_program("gcloud", gcloud_policy())
    }

    pub fn cloud_suite() -> Self {
        Self::builder(SUITE_DESTRUCTIVE)
            .with_program("gcloud", gcloud_policy())
            .with_program(
                "gsutil",
                ProgramPolicy::new(
                    "Google Cloud Storage (gsutil)",
                    &[
                        "ls",
                        "cp",
                        "mv",
                        "rm",
                        "cat",
                        "stat",
                        "acl",
                        "cors",
                        "web",
                        "iam",
                        "kms",
                        "label",
                        "logging",
                        "notification",
                        "versioning",
                    ],
                    &[
                        ("ls", "gsutil ls gs://my-bucket"),
                        ("cp", "gsutil cp file.txt gs://my-bucket/"),
                        (
                            "mv",
                            "gsutil mv gs://my-bucket/file.txt gs://my-bucket/folder/",
                        ),
                        ("rm", "gsutil rm gs://my-bucket/file.txt"),
                        ("acl", "gsutil acl get gs://my-bucket/file.txt"),
                        ("iam", "gsutil iam get gs://my-bucket"),
                    ],
                ),
            )
            .with_program(
                "bq",
                ProgramPolicy::new(
                    "BigQuery (bq)",
                    &[
                        "query", "ls", "mk", "rm", "cp", "extract", "load", "update", "show",
                        "head", "insert", "wait", "cancel",
                    ],
                    &[
                        (
                            "query",
                            "bq query --use_legacy_sql=false 'SELECT * FROM dataset.table LIMIT 10'",
                        ),
                        ("ls", "bq ls"),
                        ("mk", "bq mk new_dataset"),
                        ("rm", "bq rm dataset.table"),
                        ("show", "bq show dataset.table"),
                        ("head", "bq head dataset.table"),
                    ],
                ),
            )
            .with_program(
                "kubectl",
                ProgramPolicy::new(
                    "Kubernetes (kubectl)",
                    &[
                        "get", "describe", "logs", "exec", "apply", "create", "delete", "scale",
                        "rollout", "expose", "set", "explain", "config",
                    ],
                    &[
                        ("get", "kubectl get pods"),
                        ("describe", "kubectl describe pod my-pod"),
                        ("logs", "kubectl logs my-pod"),
                        ("apply", "kubectl apply -f deployment.yaml"),
                        (
                            "create",
                            "kubectl create deployment my-app --image=my-image:tag",
                        ),
                        ("delete", "kubectl delete pod my-pod"),
                    ],
                ),
            )
    }

    fn builder(destructive: &[&str]) -> Self {
        Self {
            programs: BTreeMap::new(),
            order: Vec::new(),
            destructive_keywords: destructive.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Add or replace a program entry.
    pub fn with_program(mut self, name: &str, policy: ProgramPolicy) -> Self {
        if !self.programs.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.programs.insert(name.to_string(), policy);
        self
    }

    /// Add destructive keywords (compared lowercased).
    pub fn with_destructive_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.destructive_keywords
            .extend(keywords.into_iter().map(|k| keyword_form(k.as_ref())));
        self
    }

    pub fn program(&self, name: &str) -> Option<&ProgramPolicy> {
        self.programs.get(name)
    }

    /// Program names in presentation order.
    pub fn programs(&self) -> impl Iterator<Item = (&str, &ProgramPolicy)> {
        self.order
            .iter()
            .filter_map(|name| self.programs.get(name).map(|p| (name.as_str(), p)))
    }

    pub fn destructive_keywords(&self) -> &BTreeSet<String> {
        &self.destructive_keywords
    }

    /// First destructive keyword present as a whole word, if any.
    pub fn destructive_keyword(&self, command: &ParsedCommand) -> Option<String> {
        command
            .words()
            .map(keyword_form)
            .find(|token| self.destructive_keywords.contains(token))
    }

    /// Gate a raw command line for `program`.
    ///
    /// Commands in `approved` (normalized form) skip the destructive check but
    /// still have to pass the prefix and category checks.
    pub fn check(
        &self,
        raw: &str,
        program: &str,
        approved: &BTreeSet<String>,
    ) -> Result<ParsedCommand, GateError> {
        let policy = self
            .program(program)
            .ok_or_else(|| GateError::UnknownProgram {
                program: program.to_string(),
            })?;
        let parsed = parse_command(raw, program)?;
        if !policy.allows(&parsed.category) {
            return Err(GateError::CategoryNotAllowed {
                program: program.to_string(),
                category: parsed.category,
            });
        }
        if approved.contains(&normalize_command_line(&parsed.command_line())) {
            return Ok(parsed);
        }
        if let Some(keyword) = self.destructive_keyword(&parsed) {
            return Err(GateError::ConfirmationRequired {
                command: parsed.command_line(),
                keyword,
            });
        }
        Ok(parsed)
    }

    /// Human-readable listing of allowed categories.
    ///
    /// With a program name, every category is listed with its example. Without
    /// one, each program is shown with up to three examples.
    pub fn describe(&self, program: Option<&str>) -> Result<String, String> {
        let mut out = String::new();
        match program {
            Some(name) => {
                let policy = self.program(name).ok_or_else(|| self.invalid_program(name))?;
                let _ = writeln!(out, "Available {name} commands:\n");
                for category in &policy.categories {
                    let _ = write!(out, "- {category}");
                    if let Some(example) = policy.examples.get(category) {
                        let _ = write!(out, " (Example: {example})");
                    }
                    out.push('\n');
                }
            }
            None => {
                out.push_str("Available tools and example commands:\n\n");
                for (name, policy) in self.programs() {
                    let _ = writeln!(out, "## {} ({})", name.to_uppercase(), policy.description);
                    let _ = writeln!(out, "Categories: {}", policy.categories.join(", "));
                    for (category, example) in policy.ordered_examples().take(3) {
                        let _ = writeln!(out, "- {category}: {example}");
                    }
                    out.push('\n');
                }
            }
        }
        out.push_str("\nTo get help on any tool or command, use the get_tool_help tool.");
        Ok(out)
    }

    pub fn invalid_program(&self, name: &str) -> String {
        let valid: Vec<&str> = self.programs().map(|(n, _)| n).collect();
        format!(
            "Invalid tool '{name}'. Valid tools are: {}",
            valid.join(", ")
        )
    }
}

fn gcloud_policy() -> ProgramPolicy {
    ProgramPolicy::new(
        "Google Cloud (gcloud)",
        &[
            "compute",
            "storage",
            "run",
            "functions",
            "config",
            "projects",
            "auth",
            "iam",
            "services",
            "container",
            "ai",
            "ml",
        ],
        &[
            ("compute", "gcloud compute instances list"),
            ("storage", "gcloud storage ls"),
            ("run", "gcloud run services list"),
            ("functions", "gcloud functions list"),
            ("config", "gcloud config list"),
            ("projects", "gcloud projects list"),
            ("auth", "gcloud auth list"),
            ("iam", "gcloud iam roles list"),
            ("services", "gcloud services list"),
            ("container", "gcloud container clusters list"),
            ("ai", "gcloud ai models list"),
        ],
    )
}
