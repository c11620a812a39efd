use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use conductor_core::mcp::McpServer;
use conductor_core::operator::build_router;
use conductor_core::{AgentAdapter, OperatorAdapter, SessionCoordinator, Side};

use crate::config::ConductorConfig;

/// Exit status after Ctrl+C (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Text returned to the agent's first, empty call.
pub fn bootstrap_hint(base_url: &str, tool_name: &str) -> String {
    format!(
        "Conductor mode is starting. Run `conductor client --url {base_url}` in a new background \
         terminal so the user can pick a task there. Do not wait for that command to finish; it keeps \
         running for the whole session. Once it is started, call the `{tool_name}` tool again with no \
         arguments and follow the instructions it returns."
    )
}

/// Serve the agent tool on stdin/stdout and the operator API over HTTP.
///
/// Returns once stdin closes (or on Ctrl+C). The HTTP server stops as soon
/// as the session is over.
pub async fn run(config: &ConductorConfig) -> Result<()> {
    let session = Arc::new(SessionCoordinator::new());
    tracing::info!(session_id = %session.id(), "session started");

    let mut agent = AgentAdapter::new(Arc::clone(&session)).with_tool_name(config.tool_name.clone());
    if config.bootstrap_hint {
        agent = agent.with_bootstrap_hint(bootstrap_hint(&config.base_url(), &config.tool_name));
    }
    let app = build_router(OperatorAdapter::new(Arc::clone(&session)));

    let addr: SocketAddr = config
        .addr()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind operator API on {addr}"))?;
    tracing::info!("operator API listening on http://{addr}");

    let cancel = CancellationToken::new();
    let http = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(session, cancel))
                .await
        }
    });

    let mcp = McpServer::new(agent);
    let interrupted = tokio::select! {
        result = mcp.serve(tokio::io::stdin(), tokio::io::stdout()) => {
            result.context("agent transport failed")?;
            false
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            tracing::info!("interrupted, aborting session");
            session.disconnect(Side::Agent);
            true
        }
    };

    cancel.cancel();
    http.await
        .context("operator API task panicked")?
        .context("operator API failed")?;
    tracing::info!(session_id = %session.id(), state = %session.state(), "conductor serve shut down");

    if interrupted {
        // The blocking stdin reader cannot be cancelled, so runtime shutdown
        // would wait for the next input line.
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
    Ok(())
}

/// Resolves once the session is over or the process is shutting down.
async fn shutdown_signal(session: Arc<SessionCoordinator>, cancel: CancellationToken) {
    tokio::select! {
        state = session.wait_for_terminal() => {
            tracing::info!(%state, "session over, stopping operator API");
        }
        () = cancel.cancelled() => {}
    }
}
