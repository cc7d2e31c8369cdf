//! Shared types for toolmesh: server descriptors, connection parameters
//! and runtime configuration.

pub mod config;
pub mod descriptor;
pub mod error;

pub use config::{load_dotenv, RuntimeConfig, ServersFile};
pub use descriptor::{HttpParams, PipeParams, ServerDescriptor, TransportKind};
pub use error::ConfigError;
