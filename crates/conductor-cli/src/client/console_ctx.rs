//! Terminal implementation of [`TaskContext`].

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use console::{Style, Term};
use inquire::{Select as InquireSelect, Text};

use conductor_core::operator::OperatorClient;
use conductor_core::task::TaskContext;
use conductor_core::{Instruction, Outcome};

/// Relays agent requests over HTTP and talks to the user on the terminal.
///
/// The status line lives on stderr and is redrawn in place; prompts clear it
/// first.
pub struct ConsoleContext {
    client: OperatorClient,
    term: Term,
    status: Mutex<Option<String>>,
}

impl ConsoleContext {
    pub fn new(client: OperatorClient) -> Self {
        Self {
            client,
            term: Term::stderr(),
            status: Mutex::new(None),
        }
    }

    fn set_status(&self, status: Option<String>) {
        let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self.term.clear_line();
        if let Some(text) = &status {
            let _ = self.term.write_str(&format_status(text));
        }
        *current = status;
    }

    /// Run `f` with the status line hidden, then restore it.
    fn without_status<R>(&self, f: impl FnOnce() -> R) -> R {
        let current = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if current.is_some() {
            let _ = self.term.clear_line();
        }
        let result = f();
        if let Some(text) = current.as_deref() {
            let _ = self.term.write_str(&format_status(text));
        }
        result
    }
}

fn format_status(text: &str) -> String {
    format!("{} {}", Style::new().cyan().apply_to("⟳"), Style::new().dim().apply_to(text))
}

#[async_trait]
impl TaskContext for ConsoleContext {
    async fn request_agent_action(&self, instruction: &str, label: Option<&str>) -> Result<Outcome> {
        let mut request = Instruction::new(instruction);
        if let Some(label) = label {
            request = request.with_label(label);
            self.set_status(Some(format!("{label} (waiting for the agent)")));
        }
        tracing::debug!(label = label.unwrap_or("-"), "relaying instruction");

        let result = self.client.relay(&request).await;
        if label.is_some() {
            self.set_status(None);
        }
        Ok(result?)
    }

    fn report_status(&self, status: Option<&str>) {
        self.set_status(status.map(str::to_string));
    }

    async fn request_user_input(&self, prompt: &str) -> Result<String> {
        self.set_status(None);
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || Text::new(&prompt).prompt())
            .await
            .context("input prompt task failed")?
            .context("failed to read input")
    }

    async fn choose(&self, prompt: &str, options: &[String]) -> Result<String> {
        self.set_status(None);
        let prompt = prompt.to_string();
        let options = options.to_vec();
        tokio::task::spawn_blocking(move || InquireSelect::new(&prompt, options).prompt())
            .await
            .context("selection prompt task failed")?
            .context("failed to read selection")
    }

    fn emit(&self, message: &str) {
        self.without_status(|| println!("{message}"));
    }
}
