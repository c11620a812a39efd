//! The built-in "Compile" task: turns a Markdown task definition into a
//! task script with the agent's help.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::script::{ScriptParseError, parse_task_script};
use super::{TaskContext, TaskUnit, TaskWorkspace};

/// Menu name of the compile task.
pub const COMPILE_TASK_NAME: &str = "Compile";

/// Attempts before giving up on output that fails validation.
pub const MAX_COMPILE_ATTEMPTS: u32 = 2;

/// Task script schema reference included in the compile instruction.
const SCHEMA_REFERENCE: &str = r#"## Task Script Schema

```toml
[task]
name = "string"          # REQUIRED. Short kebab-case name.
description = "string"   # Optional. One line shown in the task menu.

# Steps run top to bottom. Every text field is a Jinja template that may use
# variables defined by EARLIER steps, e.g. "Summarize {{ commits }}".

[[steps]]
kind = "input"           # Ask the user for free text.
prompt = "string"
var = "name"             # Stores the answer.

[[steps]]
kind = "agent"           # Hand one instruction to you, the agent.
label = "string"         # Optional. Short text shown while you work.
instruction = "string"   # What to do. Be specific and self-contained.
var = "name"             # Optional. Stores your output.
allow_failure = false    # Optional. Continue if you report success = false.

[[steps]]
kind = "choose"          # Let the user pick one option.
prompt = "string"
options = ["a", "b"]     # At least one.
var = "name"             # Stores the chosen option.

[[steps]]
kind = "status"          # Show progress. Leave out `message` to clear it.
message = "string"

[[steps]]
kind = "print"           # Show text to the user.
message = "string"
```

### Rules
- There must be at least one step.
- Variable names use letters, digits and underscores and do not start with a digit.
- A step cannot use a variable before a step above it defines it.
- Running commands, editing files and reading the codebase are all done through `agent` steps.
- Ask the user for anything the definition leaves open with `input` or `choose` steps.
"#;

/// Compiles `.conductor/tasks/<name>.md` into `.conductor/compiled/<name>.toml`.
#[derive(Debug, Clone)]
pub struct CompileTask {
    tasks_dir: PathBuf,
    compiled_dir: PathBuf,
}

impl CompileTask {
    pub fn new(workspace: &TaskWorkspace) -> Self {
        Self::with_dirs(workspace.tasks_dir(), workspace.compiled_dir())
    }

    pub fn with_dirs(tasks_dir: impl Into<PathBuf>, compiled_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
            compiled_dir: compiled_dir.into(),
        }
    }

    /// Markdown definitions in the tasks directory, sorted by file name.
    pub fn definitions(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.tasks_dir)
            .with_context(|| format!("failed to read {}", self.tasks_dir.display()))?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl TaskUnit for CompileTask {
    fn name(&self) -> &str {
        COMPILE_TASK_NAME
    }

    fn description(&self) -> &str {
        "Turn a Markdown task definition into a runnable task"
    }

    async fn run(&self, ctx: &dyn TaskContext) -> Result<()> {
        let definitions = self.definitions()?;
        if definitions.is_empty() {
            bail!(
                "no Markdown task definitions found in {}",
                self.tasks_dir.display()
            );
        }

        let file_name = ctx
            .choose("Select a task definition to compile:", &definitions)
            .await?;
        let source = self.tasks_dir.join(&file_name);
        let definition = tokio::fs::read_to_string(&source)
            .await
            .with_context(|| format!("failed to read {}", source.display()))?;
        let stem = Path::new(&file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&file_name)
            .to_string();

        let label = format!("Compiling {file_name}");
        ctx.report_status(Some(&label));

        let mut instruction = build_compile_instruction(&stem, &definition);
        let mut last_error: Option<ScriptParseError> = None;
        for attempt in 1..=MAX_COMPILE_ATTEMPTS {
            let outcome = ctx.request_agent_action(&instruction, Some(&label)).await?;
            if !outcome.success {
                ctx.report_status(None);
                bail!("the agent could not compile {file_name}: {}", outcome.output);
            }

            let script = strip_code_fences(&outcome.output);
            match parse_task_script(script) {
                Ok(_) => {
                    let target = self.compiled_dir.join(format!("{stem}.toml"));
                    tokio::fs::create_dir_all(&self.compiled_dir)
                        .await
                        .with_context(|| format!("failed to create {}", self.compiled_dir.display()))?;
                    tokio::fs::write(&target, format!("{}\n", script.trim_end()))
                        .await
                        .with_context(|| format!("failed to write {}", target.display()))?;
                    ctx.report_status(None);
                    tracing::info!(source = %source.display(), target = %target.display(), attempt, "task compiled");
                    ctx.emit(&format!("Compiled {file_name} to {}", target.display()));
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "compiled task script failed validation");
                    instruction = build_retry_instruction(&e, script);
                    last_error = Some(e);
                }
            }
        }

        ctx.report_status(None);
        match last_error {
            Some(e) => Err(anyhow::Error::new(e).context(format!(
                "the agent did not produce a valid task script for {file_name} \
                 after {MAX_COMPILE_ATTEMPTS} attempts"
            ))),
            None => bail!("the agent did not produce a task script for {file_name}"),
        }
    }
}

/// Build the instruction asking the agent to compile `definition`.
pub fn build_compile_instruction(stem: &str, definition: &str) -> String {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str(
        "Convert the Markdown task definition below into a task script: a TOML file \
         that an interactive runner executes step by step.\n\n",
    );
    prompt.push_str(&format!("Use `{stem}` as the task name.\n\n"));
    prompt.push_str(
        "IMPORTANT: Do NOT carry out the task yourself and do NOT create or modify any files. \
         Your only deliverable is the TOML text, returned as your output.\n\n",
    );

    prompt.push_str(SCHEMA_REFERENCE);
    prompt.push('\n');

    prompt.push_str("Output the TOML only, without Markdown code fences or commentary.\n\n");
    prompt.push_str("The task definition follows:\n<taskDefinition>\n");
    prompt.push_str(definition.trim());
    prompt.push_str("\n</taskDefinition>\n");

    prompt
}

/// Build the follow-up instruction after `previous` failed validation.
pub fn build_retry_instruction(error: &ScriptParseError, previous: &str) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str("The task script you produced is invalid:\n\n");
    prompt.push_str(&format!("    {error}\n\n"));
    prompt.push_str("Here is what you produced:\n<taskScript>\n");
    prompt.push_str(previous.trim());
    prompt.push_str("\n</taskScript>\n\n");
    prompt.push_str("Fix the problem and output the complete corrected TOML only.\n\n");
    prompt.push_str(SCHEMA_REFERENCE);
    prompt
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "toml") on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => return "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
