//! Task units: multi-step operator workflows that delegate single
//! instructions to the agent.
//!
//! Natural-language definitions live in `<workspace>/.conductor/tasks/*.md`.
//! The [`CompileTask`] turns one of them, with the agent's help, into a
//! declarative task script under `<workspace>/.conductor/compiled/`, which
//! the [`TaskRegistry`] discovers and [`ScriptTask`] executes.

pub mod compile;
pub mod registry;
pub mod runner;
pub mod script;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::session::Outcome;

pub use compile::CompileTask;
pub use registry::TaskRegistry;
pub use runner::ScriptTask;
pub use script::{ScriptParseError, Step, TaskMeta, TaskScript, parse_task_script};

/// Directory holding Markdown task definitions, relative to the workspace.
pub const TASKS_DIR: &str = ".conductor/tasks";

/// Directory holding compiled task scripts, relative to the workspace.
pub const COMPILED_DIR: &str = ".conductor/compiled";

/// Capabilities a running task unit gets from the operator process.
///
/// # Object Safety
///
/// Units receive `&dyn TaskContext`, so every method either returns a
/// concrete type or is made object-safe by `async_trait`.
#[async_trait]
pub trait TaskContext: Send + Sync {
    /// Hand one instruction to the agent and wait for its outcome.
    ///
    /// `label` is a short description shown to the user while waiting.
    async fn request_agent_action(&self, instruction: &str, label: Option<&str>) -> Result<Outcome>;

    /// Show a progress line. `None` clears it.
    ///
    /// Cleared automatically before asking the user anything.
    fn report_status(&self, status: Option<&str>);

    /// Ask the user for free text.
    async fn request_user_input(&self, prompt: &str) -> Result<String>;

    /// Ask the user to pick one of `options`; returns the chosen option.
    async fn choose(&self, prompt: &str, options: &[String]) -> Result<String>;

    /// Print a line for the user.
    fn emit(&self, message: &str);
}

/// A runnable operator workflow.
#[async_trait]
pub trait TaskUnit: Send + Sync {
    /// Name shown in the task menu.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run to completion. Errors are reported to the user by the caller.
    async fn run(&self, ctx: &dyn TaskContext) -> Result<()>;
}

// Compile-time assertion: both traits must be usable as trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn TaskContext, _: &dyn TaskUnit) {}
};

/// The `.conductor` area of a workspace.
#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    root: PathBuf,
}

impl TaskWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join(TASKS_DIR)
    }

    pub fn compiled_dir(&self) -> PathBuf {
        self.root.join(COMPILED_DIR)
    }

    /// Create both task directories if they do not exist yet.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.tasks_dir(), self.compiled_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
