use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::ConfigError;

/// How a tool server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON over stdin/stdout.
    #[serde(alias = "stdio")]
    Pipe,
    /// Long-lived SSE GET stream plus out-of-band POSTs.
    #[serde(alias = "sse")]
    EventStream,
    /// Hybrid streamable HTTP: SSE stream, with replies possibly inline on the POST.
    #[serde(alias = "streamable_http", alias = "streamable-http")]
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Pipe => "pipe",
            TransportKind::EventStream => "event_stream",
            TransportKind::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured tool server, as handed over by the configuration store.
///
/// `name` is the only key used by the connection manager. The
/// `connection_params` map stays free-form until a transport asks for its
/// typed view via [`ServerDescriptor::pipe_params`] or
/// [`ServerDescriptor::http_params`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    #[serde(rename = "transport")]
    pub transport_kind: TransportKind,
    #[serde(default, rename = "params")]
    pub connection_params: Map<String, Value>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ServerDescriptor {
    /// Descriptor for a subprocess server.
    pub fn pipe(name: impl Into<String>, command: impl Into<String>, args: &[&str]) -> Self {
        let mut params = Map::new();
        params.insert("command".to_string(), Value::String(command.into()));
        params.insert(
            "args".to_string(),
            Value::Array(args.iter().map(|a| Value::String(a.to_string())).collect()),
        );
        Self {
            name: name.into(),
            transport_kind: TransportKind::Pipe,
            connection_params: params,
            active: true,
        }
    }

    /// Descriptor for an HTTP-reachable server (`EventStream` or `Http`).
    pub fn http(name: impl Into<String>, kind: TransportKind, url: impl Into<String>) -> Self {
        let mut params = Map::new();
        params.insert("url".to_string(), Value::String(url.into()));
        Self {
            name: name.into(),
            transport_kind: kind,
            connection_params: params,
            active: true,
        }
    }

    /// Add a request header (HTTP kinds) or environment variable (pipe kind).
    pub fn with_param_entry(mut self, table: &str, key: &str, value: &str) -> Self {
        let entry = self
            .connection_params
            .entry(table.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Typed parameters for a `Pipe` server.
    pub fn pipe_params(&self) -> Result<PipeParams, ConfigError> {
        self.expect_kind(TransportKind::Pipe)?;
        let command = self
            .str_param("command")?
            .ok_or_else(|| ConfigError::MissingParam {
                server: self.name.clone(),
                param: "command",
            })?;
        if command.trim().is_empty() {
            return Err(self.invalid("command", "must not be empty"));
        }
        Ok(PipeParams {
            command,
            args: self.string_list_param("args")?,
            env: self.string_map_param("env")?,
        })
    }

    /// Typed parameters for an `EventStream` or `Http` server.
    pub fn http_params(&self) -> Result<HttpParams, ConfigError> {
        if self.transport_kind == TransportKind::Pipe {
            return Err(ConfigError::WrongTransport {
                server: self.name.clone(),
                expected: "event_stream or http",
                actual: self.transport_kind.as_str(),
            });
        }
        let raw = self.str_param("url")?.ok_or_else(|| ConfigError::MissingParam {
            server: self.name.clone(),
            param: "url",
        })?;
        let url = Url::parse(&raw).map_err(|e| self.invalid("url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(self.invalid("url", format!("unsupported scheme '{}'", url.scheme())));
        }
        Ok(HttpParams {
            url,
            headers: self.string_map_param("headers")?,
        })
    }

    fn expect_kind(&self, expected: TransportKind) -> Result<(), ConfigError> {
        if self.transport_kind != expected {
            return Err(ConfigError::WrongTransport {
                server: self.name.clone(),
                expected: expected.as_str(),
                actual: self.transport_kind.as_str(),
            });
        }
        Ok(())
    }

    fn invalid(&self, param: &'static str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidParam {
            server: self.name.clone(),
            param,
            reason: reason.into(),
        }
    }

    fn str_param(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        match self.connection_params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(key, "expected a string")),
        }
    }

    fn string_list_param(&self, key: &'static str) -> Result<Vec<String>, ConfigError> {
        match self.connection_params.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(self.invalid(key, "expected a list of strings")),
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "expected a list of strings")),
        }
    }

    fn string_map_param(&self, key: &'static str) -> Result<HashMap<String, String>, ConfigError> {
        match self.connection_params.get(key) {
            None | Some(Value::Null) => Ok(HashMap::new()),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    _ => Err(self.invalid(key, format!("value for '{k}' must be a string"))),
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "expected a table of strings")),
        }
    }
}

/// Connection parameters of a `Pipe` server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeParams {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Connection parameters of an `EventStream` or `Http` server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParams {
    pub url: Url,
    pub headers: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(kind: TransportKind, params: Value) -> ServerDescriptor {
        ServerDescriptor {
            name: "srv".to_string(),
            transport_kind: kind,
            connection_params: params.as_object().cloned().unwrap(),
            active: true,
        }
    }

    #[test]
    fn test_pipe_params() {
        let d = descriptor(
            TransportKind::Pipe,
            json!({"command": "npx", "args": ["-y", "server"], "env": {"TOKEN": "x"}}),
        );
        let p = d.pipe_params().unwrap();
        assert_eq!(p.command, "npx");
        assert_eq!(p.args, vec!["-y", "server"]);
        assert_eq!(p.env.get("TOKEN").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_pipe_params_missing_command() {
        let d = descriptor(TransportKind::Pipe, json!({"args": []}));
        assert!(matches!(
            d.pipe_params(),
            Err(ConfigError::MissingParam { param: "command", .. })
        ));
    }

    #[test]
    fn test_pipe_params_rejects_non_string_args() {
        let d = descriptor(TransportKind::Pipe, json!({"command": "x", "args": [1]}));
        assert!(matches!(
            d.pipe_params(),
            Err(ConfigError::InvalidParam { param: "args", .. })
        ));
    }

    #[test]
    fn test_http_params() {
        let d = descriptor(
            TransportKind::Http,
            json!({"url": "https://tools.example.com/mcp", "headers": {"Authorization": "Bearer t"}}),
        );
        let p = d.http_params().unwrap();
        assert_eq!(p.url.host_str(), Some("tools.example.com"));
        assert_eq!(p.headers.len(), 1);
    }

    #[test]
    fn test_http_params_bad_url() {
        let d = descriptor(TransportKind::EventStream, json!({"url": "not a url"}));
        assert!(matches!(
            d.http_params(),
            Err(ConfigError::InvalidParam { param: "url", .. })
        ));

        let d = descriptor(TransportKind::EventStream, json!({"url": "ftp://host/x"}));
        assert!(d.http_params().is_err());
    }

    #[test]
    fn test_wrong_transport() {
        let d = ServerDescriptor::pipe("p", "cat", &[]);
        assert!(matches!(
            d.http_params(),
            Err(ConfigError::WrongTransport { .. })
        ));
    }

    #[test]
    fn test_transport_kind_aliases() {
        let kinds: Vec<TransportKind> =
            serde_json::from_value(json!(["stdio", "sse", "streamable_http", "pipe", "http"]))
                .unwrap();
        assert_eq!(
            kinds,
            vec![
                TransportKind::Pipe,
                TransportKind::EventStream,
                TransportKind::Http,
                TransportKind::Pipe,
                TransportKind::Http,
            ]
        );
    }

    #[test]
    fn test_with_param_entry_builds_headers() {
        let d = ServerDescriptor::http("h", TransportKind::Http, "http://localhost:1/mcp")
            .with_param_entry("headers", "x-api-key", "secret");
        let p = d.http_params().unwrap();
        assert_eq!(p.headers.get("x-api-key").map(String::as_str), Some("secret"));
    }
}
