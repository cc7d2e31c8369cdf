mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::error;

use toolmesh_core::{load_dotenv, RuntimeConfig, ServersFile};
use toolmesh_mcp::{adapters_for, ClientOptions, ConnectionManager};
use toolmesh_tool_runtime::{Tool, ToolContext};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout carries only command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(path) = args.servers {
        config.servers_file = path;
    }
    config.log_summary();

    let servers = ServersFile::from_file(&config.servers_file).with_context(|| {
        format!("failed to load servers file {}", config.servers_file.display())
    })?;

    let manager = Arc::new(ConnectionManager::new(ClientOptions::from(&config)));
    manager.load_and_connect_all(servers.servers.clone()).join().await;
    for server in servers.active() {
        if manager.get_client(&server.name).await.is_none() {
            error!(server = %server.name, "Server unavailable");
        }
    }

    let outcome = run(&manager, args.command).await;
    manager.shutdown().await;
    outcome
}

async fn run(manager: &ConnectionManager, command: Command) -> Result<ExitCode> {
    match command {
        Command::Tools => {
            for routed in manager.list_all_tools().await {
                println!(
                    "{}/{}: {}",
                    routed.origin_server, routed.tool.name, routed.tool.description
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Call { server, tool, args } => {
            let input: serde_json::Value =
                serde_json::from_str(&args).context("--args is not valid JSON")?;
            if manager.get_client(&server).await.is_none() {
                bail!("server '{server}' is not connected");
            }
            let Some(adapter) = adapters_for(manager)
                .await
                .into_iter()
                .find(|a| a.server_name() == server && a.tool_name() == tool)
            else {
                bail!("no tool '{tool}' on server '{server}'");
            };

            let result = adapter.execute(input, &ToolContext::new("cli")).await?;
            println!("{}", result.content);
            Ok(if result.is_error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Resources { server } => {
            let client = manager
                .get_client(&server)
                .await
                .with_context(|| format!("server '{server}' is not connected"))?;
            let resources = client
                .list_resources()
                .await
                .with_context(|| format!("failed to list resources of '{server}'"))?;
            for resource in resources {
                println!(
                    "{}\t{}\t{}",
                    resource.uri,
                    resource.name,
                    resource.mime_type.as_deref().unwrap_or("-")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
