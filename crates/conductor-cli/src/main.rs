mod client;
mod config;
mod serve_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::{CliOverrides, ConductorConfig};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Drive an AI agent session from a local task runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the agent tool on stdin/stdout and the operator API over HTTP (default)
    Serve {
        /// Address to bind the operator API to (overrides CONDUCTOR_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port for the operator API (overrides CONDUCTOR_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the interactive task loop against a running server
    Client {
        /// Operator API base URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,
        /// Directory containing `.conductor/` (overrides CONDUCTOR_WORKSPACE)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Write a conductor config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Execute the `conductor init` command: write the default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config_to(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  server = {}:{}", cfg.server.host, cfg.server.port);
    println!("  agent.tool_name = {}", cfg.agent.tool_name);
    println!("  tasks.workspace = {}", cfg.tasks.workspace.display());
    println!();
    println!("Next: register `conductor` as an MCP server (stdio) with your agent.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    });

    // stdout carries the MCP stream in serve mode; logs always go to stderr.
    let default_level = match command {
        Commands::Serve { .. } => "info",
        Commands::Client { .. } | Commands::Init { .. } => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match command {
        Commands::Serve { host, port } => {
            let overrides = CliOverrides {
                host: host.as_deref(),
                port,
                workspace: None,
            };
            match ConductorConfig::resolve(&overrides) {
                Ok(config) => serve_cmd::run(&config).await,
                Err(e) => Err(e),
            }
        }
        Commands::Client { url, workspace } => {
            let overrides = CliOverrides {
                workspace: workspace.as_deref(),
                ..CliOverrides::default()
            };
            match ConductorConfig::resolve(&overrides) {
                Ok(config) => {
                    let url = url.unwrap_or_else(|| config.base_url());
                    client::run(&url, &config.workspace).await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Init { force } => cmd_init(force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["conductor"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from(["conductor", "serve", "--host", "0.0.0.0", "--port", "5000"]).unwrap();
        match cli.command {
            Some(Commands::Serve { host, port }) => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(5000));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn client_flags_parse() {
        let cli =
            Cli::try_parse_from(["conductor", "client", "--url", "http://localhost:4001", "--workspace", "/w"])
                .unwrap();
        match cli.command {
            Some(Commands::Client { url, workspace }) => {
                assert_eq!(url.as_deref(), Some("http://localhost:4001"));
                assert_eq!(workspace, Some(PathBuf::from("/w")));
            }
            _ => panic!("expected client"),
        }
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(Cli::try_parse_from(["conductor", "serve", "--port", "99999"]).is_err());
    }
}
