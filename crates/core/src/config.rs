use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::descriptor::ServerDescriptor;
use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

const DEFAULT_SERVERS_FILE: &str = "config/servers.toml";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SSE_READ_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CLIENT_NAME: &str = "toolmesh";

// ── Runtime config ────────────────────────────────────────────

/// Process-level settings shared by every client the manager creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Where the `[[servers]]` file lives.
    pub servers_file: PathBuf,
    /// Budget for establishing a session (spawn/GET + endpoint negotiation).
    pub connect_timeout: Duration,
    /// Budget for a single request/response exchange.
    pub request_timeout: Duration,
    /// Idle budget on the event stream; expiry closes the transport.
    pub sse_read_timeout: Duration,
    /// Name announced in `initialize`.
    pub client_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            servers_file: PathBuf::from(DEFAULT_SERVERS_FILE),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            sse_read_timeout: Duration::from_secs(DEFAULT_SSE_READ_TIMEOUT_SECS),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| match get(key) {
            None => Duration::from_secs(default),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(v) => Duration::from_secs(v),
                Err(_) => {
                    tracing::warn!(key = %key, value = %raw, default, "Invalid number, using default");
                    Duration::from_secs(default)
                }
            },
        };

        Self {
            servers_file: get("TOOLMESH_SERVERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVERS_FILE)),
            connect_timeout: secs("TOOLMESH_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: secs("TOOLMESH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            sse_read_timeout: secs("TOOLMESH_SSE_READ_TIMEOUT_SECS", DEFAULT_SSE_READ_TIMEOUT_SECS),
            client_name: get("TOOLMESH_CLIENT_NAME")
                .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Runtime config loaded:");
        tracing::info!("  servers_file:     {}", self.servers_file.display());
        tracing::info!("  connect_timeout:  {:?}", self.connect_timeout);
        tracing::info!("  request_timeout:  {:?}", self.request_timeout);
        tracing::info!("  sse_read_timeout: {:?}", self.sse_read_timeout);
        tracing::info!("  client_name:      {}", self.client_name);
    }
}

// ── Servers file ──────────────────────────────────────────────

/// The `[[servers]]` document standing in for the configuration store.
///
/// ```toml
/// [[servers]]
/// name = "files"
/// transport = "pipe"
/// params = { command = "mcp-files", args = ["--root", "/srv"] }
///
/// [[servers]]
/// name = "search"
/// transport = "http"
/// params = { url = "https://search.example.com/mcp", headers = { Authorization = "Bearer ..." } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersFile {
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
}

impl ServersFile {
    /// Load and validate a servers file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading servers file");
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a servers document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: Self = toml::from_str(content)?;
        let mut seen = HashSet::new();
        for server in &file.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer(server.name.clone()));
            }
        }
        Ok(file)
    }

    /// Descriptors with `active = true`.
    pub fn active(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.iter().filter(|s| s.active)
    }
}
