use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Discover and call the tools of configured MCP servers.
///
/// Every active server in the servers file is connected concurrently;
/// servers that fail to come up are reported and skipped.
#[derive(Parser, Debug)]
#[command(name = "toolmesh", version, about = "Discover and call MCP server tools")]
pub struct CliArgs {
    /// Servers file (default: $TOOLMESH_SERVERS_FILE or config/servers.toml)
    #[arg(long, env = "TOOLMESH_SERVERS_FILE")]
    pub servers: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every discovered tool as `server/tool: description`
    Tools,

    /// Call one tool and print its text result
    Call {
        /// Server that owns the tool
        server: String,
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// List the resources of one server
    Resources {
        server: String,
    },
}
