//! Structured parsing of proposed command lines.
//!
//! Policy checks run on [`ParsedCommand`] fields, never on the raw string.
//! Lines are split the way a POSIX shell splits words (`shlex`), shell
//! operators outside quotes are refused, and the line handed to the shell is
//! rebuilt from the checked tokens with every token re-quoted.

use std::fmt;

/// Characters that make the shell do more than run one program when unquoted.
const SHELL_OPERATORS: &[char] = &[';', '&', '|', '`', '$', '<', '>', '(', ')', '\\', '\n', '\r'];

/// A command split into program, category and trailing arguments.
///
/// Only [`parse_command`] builds one, so the tokens are always shell-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub program: String,
    pub category: String,
    pub arguments: Vec<String>,
    line: String,
}

impl ParsedCommand {
    /// All tokens in order, program first.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str())
            .chain(std::iter::once(self.category.as_str()))
            .chain(self.arguments.iter().map(String::as_str))
    }

    /// Whitespace-separated words inside the tokens.
    ///
    /// A quoted argument such as `'DROP TABLE t'` is one token but three words.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.tokens().flat_map(str::split_whitespace)
    }

    /// Shell command line that runs exactly [`Self::tokens`].
    pub fn command_line(&self) -> String {
        self.line.clone()
    }
}

/// Reasons the command gate refuses to hand a command to the invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The command does not start with `<program> ` or has no category token.
    MalformedCommand { program: String, command: String },
    /// The policy has no entry for the requested program.
    UnknownProgram { program: String },
    /// The category token is not on the program's allow-list.
    CategoryNotAllowed { program: String, category: String },
    /// An unquoted shell operator (`;`, `&&`, `|`, `$(...)`, ...) was found.
    ShellSyntax { command: String, operator: char },
    /// A destructive keyword was found; the user must confirm first.
    ConfirmationRequired { command: String, keyword: String },
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCommand { program, command } => write!(
                f,
                "malformed command '{command}': only {program} commands are supported and they \
                 must start with '{program} ' followed by a command category"
            ),
            Self::ShellSyntax { command, operator } => write!(
                f,
                "command '{command}' uses shell syntax ({operator:?}); run one command at a time \
                 without pipes, redirects, chaining or substitutions"
            ),
            Self::UnknownProgram { program } => {
                write!(f, "program '{program}' is not configured")
            }
            Self::CategoryNotAllowed { program, category } => write!(
                f,
                "the {program} command category '{category}' is not allowed"
            ),
            Self::ConfirmationRequired { command, keyword } => write!(
                f,
                "command '{command}' contains destructive keyword '{keyword}' and requires confirmation"
            ),
        }
    }
}

impl std::error::Error for GateError {}

/// Split `raw` into a [`ParsedCommand`] for `program`.
///
/// The trimmed input must begin with the program name followed by whitespace,
/// and a category token must follow. Unbalanced quotes and NUL bytes make the
/// command malformed.
pub fn parse_command(raw: &str, program: &str) -> Result<ParsedCommand, GateError> {
    let malformed = || GateError::MalformedCommand {
        program: program.to_string(),
        command: raw.trim().to_string(),
    };

    let trimmed = raw.trim();
    let rest = trimmed.strip_prefix(program).ok_or_else(malformed)?;
    if !rest.starts_with(char::is_whitespace) || trimmed.contains('\0') {
        return Err(malformed());
    }
    if let Some(operator) = unquoted_operator(trimmed) {
        return Err(GateError::ShellSyntax {
            command: trimmed.to_string(),
            operator,
        });
    }

    let words = shlex::split(trimmed).ok_or_else(malformed)?;
    let mut tokens = words.into_iter();
    if tokens.next().as_deref() != Some(program) {
        return Err(malformed());
    }
    let category = tokens.next().filter(|c| !c.is_empty()).ok_or_else(malformed)?;
    let arguments: Vec<String> = tokens.collect();

    let line = shlex::try_join(
        std::iter::once(program)
            .chain(std::iter::once(category.as_str()))
            .chain(arguments.iter().map(String::as_str)),
    )
    .map_err(|_| malformed())?;

    Ok(ParsedCommand {
        program: program.to_string(),
        category,
        arguments,
        line,
    })
}

/// First shell operator outside single or double quotes.
fn unquoted_operator(raw: &str) -> Option<char> {
    let mut quote: Option<char> = None;
    for ch in raw.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if SHELL_OPERATORS.contains(&ch) => return Some(ch),
            None => {}
        }
    }
    None
}

/// Token form used for keyword comparison: quotes stripped, lowercased.
pub fn keyword_form(token: &str) -> String {
    token
        .trim_matches(|c| c == '\'' || c == '"' || c == '`')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_program_category_and_arguments() {
        let parsed = parse_command("  gcloud compute  instances list --limit 5 ", "gcloud")
            .expect("parse");
        assert_eq!(parsed.program, "gcloud");
        assert_eq!(parsed.category, "compute");
        assert_eq!(parsed.arguments, vec!["instances", "list", "--limit", "5"]);
        assert_eq!(parsed.command_line(), "gcloud compute instances list --limit 5");
    }

    #[test]
    fn missing_prefix_is_malformed() {
        let err = parse_command("compute instances list", "gcloud").unwrap_err();
        assert!(matches!(err, GateError::MalformedCommand { .. }));
    }

    #[test]
    fn program_name_prefix_of_longer_word_is_malformed() {
        let err = parse_command("gcloudx compute list", "gcloud").unwrap_err();
        assert!(matches!(err, GateError::MalformedCommand { .. }));
    }

    #[test]
    fn program_without_category_is_malformed() {
        let err = parse_command("gcloud   ", "gcloud").unwrap_err();
        assert!(matches!(err, GateError::MalformedCommand { .. }));
        let err = parse_command("gcloud", "gcloud").unwrap_err();
        assert!(matches!(err, GateError::MalformedCommand { .. }));
    }

    #[test]
    fn keyword_form_strips_quotes_and_case() {
        assert_eq!(keyword_form("'DELETE"), "delete");
        assert_eq!(keyword_form("\"Drop\""), "drop");
        assert_eq!(keyword_form("created"), "created");
    }

    #[test]
    fn unquoted_shell_operators_are_refused() {
        for (raw, operator) in [
            ("gcloud config list; rm -rf /", ';'),
            ("gcloud config list && gcloud auth list", '&'),
            ("gcloud projects list | sh", '|'),
            ("gcloud config list > /etc/passwd", '>'),
            ("gcloud config get $(whoami)", '$'),
            ("gcloud config list `id`", '`'),
            ("gcloud config list \\\nrm", '\\'),
        ] {
            assert_eq!(
                parse_command(raw, "gcloud"),
                Err(GateError::ShellSyntax {
                    command: raw.to_string(),
                    operator,
                }),
                "{raw}"
            );
        }
    }

    #[test]
    fn quoted_operators_stay_inside_their_token() {
        let parsed = parse_command(
            "gcloud compute instances list --format='table(name, zone)'",
            "gcloud",
        )
        .expect("parse");
        assert_eq!(parsed.arguments[2], "--format=table(name, zone)");
        assert_eq!(
            shlex::split(&parsed.command_line()).expect("shell words"),
            parsed.tokens().collect::<Vec<_>>()
        );
    }

    #[test]
    fn quotes_are_resolved_before_tokens_are_seen() {
        let parsed = parse_command("gcloud compute instances dele''te \"vm-1\"", "gcloud")
            .expect("parse");
        assert_eq!(parsed.arguments, vec!["instances", "delete", "vm-1"]);
        assert_eq!(parsed.command_line(), "gcloud compute instances delete vm-1");
    }

    #[test]
    fn unbalanced_quotes_are_malformed() {
        let err = parse_command("gcloud config list 'oops", "gcloud").unwrap_err();
        assert!(matches!(err, GateError::MalformedCommand { .. }));
    }

    #[test]
    fn quoted_argument_splits_into_words() {
        let parsed = parse_command("bq query 'DROP TABLE ds.t'", "bq").expect("parse");
        assert_eq!(parsed.arguments, vec!["DROP TABLE ds.t"]);
        assert_eq!(
            parsed.words().collect::<Vec<_>>(),
            vec!["bq", "query", "DROP", "TABLE", "ds.t"]
        );
    }
}
