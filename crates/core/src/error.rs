use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate server name: {0}")]
    DuplicateServer(String),

    #[error("Server '{server}' is missing connection parameter '{param}'")]
    MissingParam { server: String, param: &'static str },

    #[error("Server '{server}' has invalid connection parameter '{param}': {reason}")]
    InvalidParam {
        server: String,
        param: &'static str,
        reason: String,
    },

    #[error("Server '{server}' uses transport {actual}, expected {expected}")]
    WrongTransport {
        server: String,
        expected: &'static str,
        actual: &'static str,
    },
}
