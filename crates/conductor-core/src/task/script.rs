//! Task script format and validation.
//!
//! A task script is a TOML file with a `[task]` header and an ordered list
//! of `[[steps]]`, each tagged by `kind`. Text fields are minijinja
//! templates rendered against the variables captured by earlier steps.

use std::collections::HashSet;

use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Functions minijinja provides to every template; not script variables.
const BUILTIN_GLOBALS: &[&str] = &["range", "dict", "namespace", "debug"];

/// Top-level structure of a task script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskScript {
    pub task: TaskMeta,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// The `[task]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A single `[[steps]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Ask the user for free text and store it in `var`.
    Input { prompt: String, var: String },
    /// Delegate `instruction` to the agent; store its output in `var` if set.
    Agent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        instruction: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        var: Option<String>,
        /// Keep going when the agent reports `success = false`.
        #[serde(default)]
        allow_failure: bool,
    },
    /// Let the user pick one of `options` and store it in `var`.
    Choose {
        prompt: String,
        options: Vec<String>,
        var: String,
    },
    /// Set the status line; no message clears it.
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Show text to the user.
    Print { message: String },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Agent { .. } => "agent",
            Self::Choose { .. } => "choose",
            Self::Status { .. } => "status",
            Self::Print { .. } => "print",
        }
    }

    /// Variable this step defines, if any.
    pub fn defines(&self) -> Option<&str> {
        match self {
            Self::Input { var, .. } | Self::Choose { var, .. } => Some(var.as_str()),
            Self::Agent { var, .. } => var.as_deref(),
            Self::Status { .. } | Self::Print { .. } => None,
        }
    }

    /// Template fields of this step as `(field name, source)`.
    pub fn templates(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Input { prompt, .. } | Self::Choose { prompt, .. } => vec![("prompt", prompt.as_str())],
            Self::Agent {
                label, instruction, ..
            } => {
                let mut fields = vec![("instruction", instruction.as_str())];
                if let Some(label) = label {
                    fields.push(("label", label.as_str()));
                }
                fields
            }
            Self::Status { message } => message.iter().map(|m| ("message", m.as_str())).collect(),
            Self::Print { message } => vec![("message", message.as_str())],
        }
    }
}

/// Errors that can occur while parsing and validating a task script.
///
/// Step numbers are 1-based.
#[derive(Debug, Error)]
pub enum ScriptParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("task name must not be empty")]
    EmptyName,

    #[error("task script must contain at least one step")]
    NoSteps,

    #[error(
        "step {step}: invalid variable name {var:?} \
         (use letters, digits and underscores, not starting with a digit)"
    )]
    InvalidVariable { step: usize, var: String },

    #[error("step {step}: `choose` needs at least one option")]
    NoOptions { step: usize },

    #[error("step {step}: invalid template in `{field}`: {source}")]
    InvalidTemplate {
        step: usize,
        field: &'static str,
        #[source]
        source: minijinja::Error,
    },

    #[error("step {step}: `{field}` uses {var:?}, which no earlier step defines")]
    UndefinedVariable {
        step: usize,
        field: &'static str,
        var: String,
    },
}

/// Template environment shared by validation and execution.
///
/// Strict undefined handling: a missing variable is an error, never an
/// empty string.
pub fn template_env<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

/// Parse and validate a task script.
pub fn parse_task_script(content: &str) -> Result<TaskScript, ScriptParseError> {
    let script: TaskScript = toml::from_str(content)?;
    validate(&script)?;
    Ok(script)
}

fn validate(script: &TaskScript) -> Result<(), ScriptParseError> {
    if script.task.name.trim().is_empty() {
        return Err(ScriptParseError::EmptyName);
    }
    if script.steps.is_empty() {
        return Err(ScriptParseError::NoSteps);
    }

    let env = template_env();
    let mut defined: HashSet<&str> = HashSet::new();

    for (idx, step) in script.steps.iter().enumerate() {
        let step_no = idx + 1;

        if let Step::Choose { options, .. } = step {
            if options.is_empty() {
                return Err(ScriptParseError::NoOptions { step: step_no });
            }
        }

        // A step's own variable is not visible in its templates.
        for (field, source) in step.templates() {
            let template =
                env.template_from_str(source)
                    .map_err(|e| ScriptParseError::InvalidTemplate {
                        step: step_no,
                        field,
                        source: e,
                    })?;
            let mut used: Vec<String> = template.undeclared_variables(false).into_iter().collect();
            used.sort();
            if let Some(var) = used
                .into_iter()
                .find(|v| !defined.contains(v.as_str()) && !BUILTIN_GLOBALS.contains(&v.as_str()))
            {
                return Err(ScriptParseError::UndefinedVariable {
                    step: step_no,
                    field,
                    var,
                });
            }
        }

        if let Some(var) = step.defines() {
            if !is_identifier(var) {
                return Err(ScriptParseError::InvalidVariable {
                    step: step_no,
                    var: var.to_string(),
                });
            }
            defined.insert(var);
        }
    }

    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASE_NOTES: &str = r#"
[task]
name = "release-notes"
description = "Draft release notes"

[[steps]]
kind = "input"
prompt = "Which version?"
var = "version"

[[steps]]
kind = "agent"
label = "Collecting commits for {{ version }}"
instruction = "List the commits since tag v{{ version }}."
var = "commits"

[[steps]]
kind = "choose"
prompt = "Audience?"
options = ["users", "developers"]
var = "audience"

[[steps]]
kind = "status"
message = "Writing notes"

[[steps]]
kind = "status"

[[steps]]
kind = "print"
message = "Notes for {{ audience }}:\n{{ commits }}"
"#;

    #[test]
    fn parse_valid_script() {
        let script = parse_task_script(RELEASE_NOTES).expect("should parse");
        assert_eq!(script.task.name, "release-notes");
        assert_eq!(script.steps.len(), 6);
        assert_eq!(
            script.steps[1],
            Step::Agent {
                label: Some("Collecting commits for {{ version }}".to_string()),
                instruction: "List the commits since tag v{{ version }}.".to_string(),
                var: Some("commits".to_string()),
                allow_failure: false,
            }
        );
        assert_eq!(script.steps[4], Step::Status { message: None });
        assert_eq!(script.steps[5].kind(), "print");
    }

    #[test]
    fn rejects_missing_steps() {
        let err = parse_task_script("[task]\nname = \"empty\"\n").unwrap_err();
        assert!(matches!(err, ScriptParseError::NoSteps), "got {err}");
    }

    #[test]
    fn rejects_blank_name() {
        let toml_str = r#"
[task]
name = "  "

[[steps]]
kind = "print"
message = "hi"
"#;
        assert!(matches!(
            parse_task_script(toml_str).unwrap_err(),
            ScriptParseError::EmptyName
        ));
    }

    #[test]
    fn rejects_unknown_step_kind() {
        let toml_str = r#"
[task]
name = "odd"

[[steps]]
kind = "shell"
command = "rm -rf /"
"#;
        assert!(matches!(
            parse_task_script(toml_str).unwrap_err(),
            ScriptParseError::TomlError(_)
        ));
    }

    #[test]
    fn rejects_choose_without_options() {
        let toml_str = r#"
[task]
name = "pick"

[[steps]]
kind = "choose"
prompt = "Which?"
options = []
var = "which"
"#;
        assert!(matches!(
            parse_task_script(toml_str).unwrap_err(),
            ScriptParseError::NoOptions { step: 1 }
        ));
    }

    #[test]
    fn rejects_bad_variable_name() {
        let toml_str = r#"
[task]
name = "vars"

[[steps]]
kind = "input"
prompt = "Name?"
var = "1st-name"
"#;
        let err = parse_task_script(toml_str).unwrap_err();
        match err {
            ScriptParseError::InvalidVariable { step, var } => {
                assert_eq!(step, 1);
                assert_eq!(var, "1st-name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_variable_used_before_definition() {
        let toml_str = r#"
[task]
name = "order"

[[steps]]
kind = "print"
message = "Hello {{ name }}"

[[steps]]
kind = "input"
prompt = "Name?"
var = "name"
"#;
        let err = parse_task_script(toml_str).unwrap_err();
        match err {
            ScriptParseError::UndefinedVariable { step, field, var } => {
                assert_eq!(step, 1);
                assert_eq!(field, "message");
                assert_eq!(var, "name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn step_cannot_use_its_own_variable() {
        let toml_str = r#"
[task]
name = "self"

[[steps]]
kind = "input"
prompt = "Current value is {{ answer }}"
var = "answer"
"#;
        assert!(matches!(
            parse_task_script(toml_str).unwrap_err(),
            ScriptParseError::UndefinedVariable { step: 1, .. }
        ));
    }

    #[test]
    fn rejects_broken_template() {
        let toml_str = r#"
[task]
name = "broken"

[[steps]]
kind = "print"
message = "{% if %}"
"#;
        let err = parse_task_script(toml_str).unwrap_err();
        assert!(matches!(err, ScriptParseError::InvalidTemplate { step: 1, .. }), "got {err}");
    }

    #[test]
    fn builtin_functions_are_not_variables() {
        let toml_str = r#"
[task]
name = "loop"

[[steps]]
kind = "print"
message = "{% for i in range(3) %}{{ i }}{% endfor %}"
"#;
        parse_task_script(toml_str).expect("range is a builtin");
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("version"));
        assert!(is_identifier("_tmp2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier("has space"));
    }
}
