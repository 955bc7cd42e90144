use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use netdiag_bridge::config::BridgeConfig;
use netdiag_bridge::mcp_bridge::BackendRegistry;

/// Query network MCP tool servers over stdio.
#[derive(Debug, Parser)]
#[command(name = "netdiag-bridge", version, about)]
struct Cli {
    /// Config file (defaults to $NETDIAG_BRIDGE_CONFIG or netdiag-bridge.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing `<backend>-server/build/index.js`.
    #[arg(long, global = true, env = "NETDIAG_SERVERS_ROOT")]
    servers_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the registered backend names.
    Backends,
    /// List the tools one backend exposes.
    ListTools {
        backend: String,
    },
    /// List the tools of every backend.
    ListAll,
    /// Call a tool on a backend.
    CallTool {
        backend: String,
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, value_name = "JSON")]
        args: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = BridgeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(root) = &cli.servers_root {
        config.servers_root = Some(root.to_string_lossy().into_owned());
    }

    netdiag_bridge::init_tracing(&config.log_settings()).context("initializing logging")?;

    let registry = BackendRegistry::standard(&config).context("building backend registry")?;

    match cli.command {
        Command::Backends => {
            print_json(&registry.names())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ListTools { backend } => {
            let listing = registry.list_tools(&backend).await?;
            print_json(&listing)?;
            Ok(exit_code(listing.is_error()))
        }
        Command::ListAll => {
            let all = registry.list_all_tools().await;
            let any_failed = all.iter().any(|(_, listing)| listing.is_error());
            let report: serde_json::Map<String, serde_json::Value> = all
                .into_iter()
                .map(|(name, listing)| serde_json::to_value(listing).map(|value| (name, value)))
                .collect::<Result<_, serde_json::Error>>()?;
            print_json(&report)?;
            Ok(exit_code(any_failed))
        }
        Command::CallTool {
            backend,
            tool,
            args,
        } => {
            let arguments = parse_arguments(args.as_deref())?;
            let outcome = registry.call_tool(&backend, &tool, arguments).await?;
            print_json(&outcome)?;
            Ok(exit_code(outcome.is_error()))
        }
    }
}

/// Parse `--args`, which must be a JSON object when given.
fn parse_arguments(
    raw: Option<&str>,
) -> anyhow::Result<Option<serde_json::Map<String, serde_json::Value>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<serde_json::Value>(raw).context("--args is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(Some(map)),
        other => bail!("--args must be a JSON object, got {other}"),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
