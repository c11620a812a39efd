//! `conductor client`: the operator-side task loop.

mod console_ctx;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::Style;
use inquire::{InquireError, Select as InquireSelect};

use conductor_core::BridgeError;
use conductor_core::operator::{ClientError, OperatorClient};
use conductor_core::task::{CompileTask, TaskContext, TaskRegistry, TaskUnit, TaskWorkspace};

pub use console_ctx::ConsoleContext;

/// One entry of the task menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuChoice {
    Task(String),
    Compile,
    Exit,
}

impl fmt::Display for MenuChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MenuChoice::Task(name) => write!(f, "{name}"),
            MenuChoice::Compile => write!(f, "Compile (turn a Markdown task into a runnable one)"),
            MenuChoice::Exit => write!(f, "Exit (end the session)"),
        }
    }
}

/// Compiled tasks first, then the built-in entries.
pub fn menu_entries(registry: &TaskRegistry) -> Vec<MenuChoice> {
    let mut entries: Vec<MenuChoice> = registry
        .names()
        .into_iter()
        .map(|name| MenuChoice::Task(name.to_string()))
        .collect();
    entries.push(MenuChoice::Compile);
    entries.push(MenuChoice::Exit);
    entries
}

/// Whether `err` means the session itself is over, not just the task.
pub fn is_session_over(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ClientError>(),
            Some(ClientError::Bridge(
                BridgeError::SessionClosed | BridgeError::PeerDisconnected
            ))
        ) || matches!(
            cause.downcast_ref::<BridgeError>(),
            Some(BridgeError::SessionClosed | BridgeError::PeerDisconnected)
        )
    })
}

/// Execute `conductor client`.
pub async fn run(base_url: &str, workspace: &Path) -> Result<()> {
    let client = OperatorClient::new(base_url);
    wait_for_server(&client).await?;

    let workspace = TaskWorkspace::new(workspace);
    workspace.ensure()?;

    let ctx = ConsoleContext::new(client.clone());
    task_loop(&client, &workspace, &ctx).await
}

async fn wait_for_server(client: &OperatorClient) -> Result<()> {
    let dim = Style::new().dim();
    if client.health().await.is_err() {
        eprintln!(
            "{}",
            dim.apply_to(format!(
                "Waiting for the conductor server at {} (retrying every second)...",
                client.base_url()
            ))
        );
        client
            .wait_until_ready(Duration::from_secs(1), None)
            .await
            .context("conductor server never became ready")?;
    }
    println!(
        "{} {}",
        Style::new().green().bold().apply_to("✓"),
        format_args!("Connected to conductor at {}", client.base_url())
    );
    Ok(())
}

async fn task_loop(client: &OperatorClient, workspace: &TaskWorkspace, ctx: &ConsoleContext) -> Result<()> {
    let red = Style::new().red().bold();
    let green = Style::new().green();

    loop {
        let registry = TaskRegistry::discover(&workspace.compiled_dir())?;
        let choice = select_task(menu_entries(&registry)).await?;

        let result = match &choice {
            MenuChoice::Exit => {
                end_session(client).await;
                return Ok(());
            }
            MenuChoice::Compile => run_unit(&CompileTask::new(workspace), ctx).await,
            MenuChoice::Task(name) => match registry.load(name) {
                Ok(task) => run_unit(&task, ctx).await,
                Err(e) => Err(e.into()),
            },
        };

        match result {
            Ok(()) => println!("{} {}", green.apply_to("✓"), format_args!("{choice} finished")),
            Err(e) if is_session_over(&e) => {
                eprintln!("{} {e:#}", red.apply_to("Session ended:"));
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(task = %choice, error = %e, "task failed");
                eprintln!("{} {e:#}", red.apply_to("Task failed:"));
            }
        }
    }
}

async fn select_task(entries: Vec<MenuChoice>) -> Result<MenuChoice> {
    let answer = tokio::task::spawn_blocking(move || {
        InquireSelect::new("What should the agent do next?", entries).prompt()
    })
    .await
    .context("menu prompt task failed")?;

    match answer {
        Ok(choice) => Ok(choice),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(MenuChoice::Exit),
        Err(e) => Err(e).context("failed to read menu selection"),
    }
}

async fn run_unit(unit: &dyn TaskUnit, ctx: &ConsoleContext) -> Result<()> {
    println!("{}", Style::new().bold().apply_to(format!("▶ {}", unit.name())));
    let result = unit.run(ctx).await;
    ctx.report_status(None);
    result
}

async fn end_session(client: &OperatorClient) {
    match client.terminate().await {
        Ok(()) | Err(ClientError::Bridge(BridgeError::SessionClosed)) => {
            println!("Session ended. The agent has been told to stop.");
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to end the session cleanly");
            eprintln!("Could not end the session cleanly: {e}");
        }
    }
}
