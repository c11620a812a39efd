//! Configuration file management for conductor.
//!
//! Provides a TOML-based config file at `~/.config/conductor/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use conductor_core::agent::DEFAULT_TOOL_NAME;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4001;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub tasks: TasksSection,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Name the agent tool is registered under.
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    /// Answer the agent's first call with instructions for starting the client.
    #[serde(default = "default_true")]
    pub bootstrap_hint: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            tool_name: default_tool_name(),
            bootstrap_hint: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TasksSection {
    /// Directory containing `.conductor/`.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_tool_name() -> String {
    DEFAULT_TOOL_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the conductor config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/conductor` or
/// `~/.config/conductor`, also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("conductor");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("conductor")
}

/// Return the path to the conductor config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file at `path`, or `None` if there is none.
///
/// A file that exists but does not parse is an error.
pub fn load_config_from(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// CLI flags that take part in config resolution.
#[derive(Debug, Default)]
pub struct CliOverrides<'a> {
    pub host: Option<&'a str>,
    pub port: Option<u16>,
    pub workspace: Option<&'a Path>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq)]
pub struct ConductorConfig {
    pub host: String,
    pub port: u16,
    pub tool_name: String,
    pub bootstrap_hint: bool,
    pub workspace: PathBuf,
}

impl ConductorConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Host: `--host` > `CONDUCTOR_HOST` > `server.host` > `127.0.0.1`
    /// - Port: `--port` > `CONDUCTOR_PORT` > `server.port` > `4001`
    /// - Workspace: `--workspace` > `CONDUCTOR_WORKSPACE` > `tasks.workspace` > `.`
    pub fn resolve(cli: &CliOverrides<'_>) -> Result<Self> {
        let file = load_config_from(&config_path())?;
        Self::resolve_with(cli, file)
    }

    fn resolve_with(cli: &CliOverrides<'_>, file: Option<ConfigFile>) -> Result<Self> {
        let file = file.unwrap_or_default();

        let host = if let Some(host) = cli.host {
            host.to_string()
        } else if let Ok(host) = std::env::var("CONDUCTOR_HOST") {
            host
        } else {
            file.server.host
        };

        let port = if let Some(port) = cli.port {
            port
        } else if let Ok(raw) = std::env::var("CONDUCTOR_PORT") {
            raw.trim()
                .parse::<u16>()
                .with_context(|| format!("CONDUCTOR_PORT env var is not a valid port: {raw:?}"))?
        } else {
            file.server.port
        };

        let workspace = if let Some(dir) = cli.workspace {
            dir.to_path_buf()
        } else if let Ok(dir) = std::env::var("CONDUCTOR_WORKSPACE") {
            PathBuf::from(dir)
        } else {
            file.tasks.workspace
        };

        Ok(Self {
            host,
            port,
            tool_name: file.agent.tool_name,
            bootstrap_hint: file.agent.bootstrap_hint,
            workspace,
        })
    }

    /// `host:port` for binding the operator API.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL of the operator API.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr())
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        unsafe { std::env::remove_var("CONDUCTOR_HOST") };
        unsafe { std::env::remove_var("CONDUCTOR_PORT") };
        unsafe { std::env::remove_var("CONDUCTOR_WORKSPACE") };
    }

    fn file_with_port(port: u16) -> ConfigFile {
        ConfigFile {
            server: ServerSection {
                host: "0.0.0.0".to_string(),
                port,
            },
            agent: AgentSection {
                tool_name: "copilot_conductor".to_string(),
                bootstrap_hint: false,
            },
            tasks: TasksSection {
                workspace: PathBuf::from("/srv/project"),
            },
        }
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("conductor").join("config.toml");

        let original = file_with_port(5000);
        save_config_to(&path, &original).unwrap();

        let loaded = load_config_from(&path).unwrap().expect("file should exist");
        assert_eq!(loaded, original);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_config_from(&tmp.path().join("config.toml")).unwrap().is_none());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let file: ConfigFile = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(file.server.host, DEFAULT_HOST);
        assert_eq!(file.server.port, 9000);
        assert_eq!(file.agent.tool_name, DEFAULT_TOOL_NAME);
        assert!(file.agent.bootstrap_hint);
        assert_eq!(file.tasks.workspace, PathBuf::from("."));
    }

    #[test]
    fn resolve_defaults_without_file_or_env() {
        let _lock = lock_env();
        clear_env();

        let config = ConductorConfig::resolve_with(&CliOverrides::default(), None).unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.tool_name, DEFAULT_TOOL_NAME);
        assert!(config.bootstrap_hint);
        assert_eq!(config.base_url(), "http://127.0.0.1:4001");
    }

    #[test]
    fn resolve_file_beats_default() {
        let _lock = lock_env();
        clear_env();

        let config =
            ConductorConfig::resolve_with(&CliOverrides::default(), Some(file_with_port(5000))).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:5000");
        assert_eq!(config.tool_name, "copilot_conductor");
        assert!(!config.bootstrap_hint);
        assert_eq!(config.workspace, PathBuf::from("/srv/project"));
    }

    #[test]
    fn resolve_env_beats_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var("CONDUCTOR_HOST", "10.0.0.1") };
        unsafe { std::env::set_var("CONDUCTOR_PORT", "6000") };
        unsafe { std::env::set_var("CONDUCTOR_WORKSPACE", "/env/ws") };

        let config =
            ConductorConfig::resolve_with(&CliOverrides::default(), Some(file_with_port(5000))).unwrap();
        assert_eq!(config.addr(), "10.0.0.1:6000");
        assert_eq!(config.workspace, PathBuf::from("/env/ws"));

        clear_env();
    }

    #[test]
    fn resolve_cli_flag_overrides_all() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var("CONDUCTOR_HOST", "10.0.0.1") };
        unsafe { std::env::set_var("CONDUCTOR_PORT", "6000") };

        let cli = CliOverrides {
            host: Some("localhost"),
            port: Some(7000),
            workspace: Some(Path::new("/cli/ws")),
        };
        let config = ConductorConfig::resolve_with(&cli, Some(file_with_port(5000))).unwrap();
        assert_eq!(config.addr(), "localhost:7000");
        assert_eq!(config.workspace, PathBuf::from("/cli/ws"));

        clear_env();
    }

    #[test]
    fn resolve_rejects_invalid_env_port() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var("CONDUCTOR_PORT", "eighty") };

        let err = ConductorConfig::resolve_with(&CliOverrides::default(), None).unwrap_err();
        assert!(err.to_string().contains("CONDUCTOR_PORT"), "got {err}");

        clear_env();
    }

    #[test]
    fn resolve_reads_config_path_from_xdg() {
        let _lock = lock_env();
        clear_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        assert_eq!(config_path(), tmp.path().join("conductor").join("config.toml"));
        save_config_to(&config_path(), &file_with_port(5555)).unwrap();
        let config = ConductorConfig::resolve(&CliOverrides::default()).unwrap();
        assert_eq!(config.port, 5555);

        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }
}
