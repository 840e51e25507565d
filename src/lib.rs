//! AgentDesk - conversation state synchronizer for an external coding agent
//!
//! Ingests the asynchronous notification stream of a long-running agent
//! app-server and keeps a consistent threads → turns → items tree:
//! - Reducer that merges notifications idempotently and tolerates reordering
//! - Turn submission with optimistic echo and interrupt
//! - Approval correlation back to server-initiated requests
//! - Hydration of persisted transcripts into live turns

pub mod approvals;
pub mod hydration;
pub mod orchestrator;
pub mod protocol;
pub mod reducer;
pub mod session;
pub mod store;
pub mod transport;

pub use approvals::Decision;
pub use orchestrator::{Attachment, IdeContext, SendOutcome};
pub use session::{Notice, NoticeLevel, SessionCommand, SessionController, StoreEvent};
pub use store::{Item, ItemKind, Store, ThreadDetail, Turn, TurnStatus};
pub use transport::{AgentTransport, JsonlTransport};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default window after a send before a missing stream is reported
pub const DEFAULT_STALL_NOTICE_SECS: u64 = 30;

/// How much autonomy the agent gets for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    /// Never prompts; mutations fail closed in a read-only sandbox
    ReadOnly,
    /// Scoped write access, every action still asks for approval
    #[default]
    Auto,
    /// No sandbox and no approvals
    FullAccess,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadOnly => write!(f, "read-only"),
            AccessMode::Auto => write!(f, "auto"),
            AccessMode::FullAccess => write!(f, "full-access"),
        }
    }
}

/// Configuration for a synchronizer session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Working directory passed to new threads and turns
    pub cwd: PathBuf,

    /// Access mode used to derive approval and sandbox policies
    pub mode: AccessMode,

    /// Extra roots the agent may write to in `auto` mode
    pub writable_roots: Vec<PathBuf>,

    /// Model override for new turns
    pub model: Option<String>,

    /// Reasoning effort override for new turns
    pub effort: Option<String>,

    /// Whether to prefix prompts with the active file/selection
    pub include_ide_context: bool,

    /// Whether the sandbox allows network access in `auto` mode
    pub network_access: bool,

    /// Quiet period after a send before a stall notice is emitted
    pub stall_notice_after: Duration,
}

impl SessionConfig {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            mode: AccessMode::default(),
            writable_roots: Vec::new(),
            model: None,
            effort: None,
            include_ide_context: true,
            network_access: false,
            stall_notice_after: Duration::from_secs(DEFAULT_STALL_NOTICE_SECS),
        }
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_writable_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.writable_roots = roots;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_effort(mut self, effort: impl Into<String>) -> Self {
        self.effort = Some(effort.into());
        self
    }

    pub fn with_ide_context(mut self, enabled: bool) -> Self {
        self.include_ide_context = enabled;
        self
    }

    pub fn with_stall_notice_after(mut self, window: Duration) -> Self {
        self.stall_notice_after = window;
        self
    }

    /// Parse a TOML config document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str, default_cwd: PathBuf) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let mut config = Self::new(file.cwd.unwrap_or(default_cwd));
        if let Some(mode) = file.mode {
            config.mode = mode;
        }
        config.writable_roots = file.writable_roots;
        config.model = file.model;
        config.effort = file.effort;
        if let Some(enabled) = file.include_ide_context {
            config.include_ide_context = enabled;
        }
        if let Some(network) = file.network_access {
            config.network_access = network;
        }
        if let Some(secs) = file.stall_notice_secs {
            if secs == 0 {
                return Err(AgentDeskError::Config(
                    "stall-notice-secs must be greater than zero".to_string(),
                ));
            }
            config.stall_notice_after = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Load config from a file; a missing file yields the defaults.
    pub fn load(path: &Path, default_cwd: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(default_cwd));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text, default_cwd)
    }
}

/// `~/.config/agentdesk/config.toml` (platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentdesk").join("config.toml"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct ConfigFile {
    cwd: Option<PathBuf>,
    mode: Option<AccessMode>,
    writable_roots: Vec<PathBuf>,
    model: Option<String>,
    effort: Option<String>,
    include_ide_context: Option<bool>,
    network_access: Option<bool>,
    stall_notice_secs: Option<u64>,
}

/// Result type for AgentDesk operations
pub type Result<T> = std::result::Result<T, AgentDeskError>;

/// Errors that can occur in AgentDesk
#[derive(Debug, thiserror::Error)]
pub enum AgentDeskError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("App-server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("App-server connection closed")]
    ConnectionClosed,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let text = r#"
            mode = "full-access"
            writable-roots = ["/tmp/extra"]
            model = "gpt-5"
            include-ide-context = false
            stall-notice-secs = 5
        "#;
        let config = SessionConfig::from_toml_str(text, PathBuf::from("/work")).unwrap();
        assert_eq!(config.cwd, PathBuf::from("/work"));
        assert_eq!(config.mode, AccessMode::FullAccess);
        assert_eq!(config.writable_roots, vec![PathBuf::from("/tmp/extra")]);
        assert_eq!(config.model.as_deref(), Some("gpt-5"));
        assert!(!config.include_ide_context);
        assert_eq!(config.stall_notice_after, Duration::from_secs(5));
    }

    #[test]
    fn test_config_defaults_when_empty() {
        let config = SessionConfig::from_toml_str("", PathBuf::from("/work")).unwrap();
        assert_eq!(config, SessionConfig::new(PathBuf::from("/work")));
    }

    #[test]
    fn test_config_rejects_zero_stall_window() {
        let err = SessionConfig::from_toml_str("stall-notice-secs = 0", PathBuf::from("/w"));
        assert!(matches!(err, Err(AgentDeskError::Config(_))));
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cwd = \"/srv/app\"\nmode = \"read-only\"\nnetwork-access = true\n").unwrap();

        let config = SessionConfig::load(&path, PathBuf::from("/fallback")).unwrap();
        assert_eq!(config.cwd, PathBuf::from("/srv/app"));
        assert_eq!(config.mode, AccessMode::ReadOnly);
        assert!(config.network_access);

        let missing = SessionConfig::load(&dir.path().join("nope.toml"), PathBuf::from("/fallback")).unwrap();
        assert_eq!(missing, SessionConfig::new(PathBuf::from("/fallback")));
    }

    #[test]
    fn test_config_rejects_unknown_mode() {
        let err = SessionConfig::from_toml_str("mode = \"yolo\"", PathBuf::from("/w"));
        assert!(matches!(err, Err(AgentDeskError::Toml(_))));
    }
}
