//! Relay CLI: inspect and call tools served by MCP workers.

mod shell;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_config::{CliOverrides, RelayConfig};
use relay_mcp::{LifetimePolicy, ToolHost, WorkerStatus};
use relay_types::{ToolCall, ToolResult};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "relay", version, about = "Host and call MCP tool workers")]
struct Cli {
    /// Config file to use instead of the global and project files
    #[arg(long)]
    config: Option<PathBuf>,

    /// Connection lifetime: pooled or ephemeral
    #[arg(long)]
    lifetime: Option<LifetimePolicy>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every tool from every configured worker
    Tools,
    /// Call one tool and print the result as JSON
    Call {
        /// Tool name as listed by `relay tools`
        tool: String,
        /// Arguments as a JSON object
        args: Option<String>,
    },
    /// Run several calls concurrently in one turn and print the results
    Batch {
        /// JSON array of `{"name": ..., "arguments": {...}}` objects
        calls: String,
    },
    /// Connect to every worker and show its status
    Workers,
    /// Interactive loop over a pooled set of workers
    Shell,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = RelayConfig::load(CliOverrides {
        config_path: cli.config,
        lifetime: cli.lifetime,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    if config.mcp.servers.is_empty() {
        eprintln!(
            "No workers configured. Add [mcp.servers.<name>] to ./relay.toml or {}",
            config.config_dir.join(relay_config::GLOBAL_CONFIG_FILE).display()
        );
    }

    // The shell keeps its workers warm between commands
    let lifetime = match cli.command {
        Command::Shell => LifetimePolicy::Pooled,
        _ => config.lifetime,
    };
    let host = ToolHost::with_stdio(config.mcp, lifetime);

    let outcome = match cli.command {
        Command::Tools => list_tools(&host).await.map(|_| ExitCode::SUCCESS),
        Command::Call { tool, args } => call(&host, tool, args).await,
        Command::Batch { calls } => batch(&host, &calls).await,
        Command::Workers => show_workers(&host).await.map(|_| ExitCode::SUCCESS),
        Command::Shell => shell::run(&host).await.map(|_| ExitCode::SUCCESS),
    };

    host.shutdown().await;
    outcome
}

async fn list_tools(host: &ToolHost) -> Result<()> {
    let registry = host.pool().all_tools().await;
    if registry.is_empty() {
        eprintln!("No tools available.");
        return Ok(());
    }
    for tool in registry.iter() {
        let definition = &tool.definition;
        println!(
            "{}",
            format_tool_line(&definition.name, &tool.worker, &definition.description)
        );
    }
    for collision in registry.collisions() {
        eprintln!(
            "note: '{}' offered by {}",
            collision.name,
            collision.workers.join(", ")
        );
    }
    Ok(())
}

async fn call(host: &ToolHost, tool: String, args: Option<String>) -> Result<ExitCode> {
    let arguments = parse_args(args.as_deref())?;
    let call = ToolCall::new(tool, arguments);

    // Ctrl+C abandons the turn; its workers are still closed on the way out
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let result = host
        .turn_with_cancel(&cancel, |tools| async move { tools.call(call).await })
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    print_result(&result)?;
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn batch(host: &ToolHost, raw: &str) -> Result<ExitCode> {
    let calls = parse_batch(raw)?;
    let results = host
        .turn(|tools| async move { tools.call_all(calls).await })
        .await;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(if results.iter().all(ToolResult::is_success) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Parse `[{"name": "add", "arguments": {...}}, ...]` into calls.
fn parse_batch(raw: &str) -> Result<Vec<ToolCall>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("Batch must be a JSON array")?;
    let entries = value.as_array().context("Batch must be a JSON array")?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| -> Result<ToolCall> {
            let name = entry
                .get("name")
                .and_then(|n| n.as_str())
                .with_context(|| format!("Batch entry {i} has no \"name\""))?;
            let arguments = entry
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            Ok(ToolCall::new(name, arguments))
        })
        .collect()
}

async fn show_workers(host: &ToolHost) -> Result<()> {
    // Connect everything first so the status reflects real attempts
    host.pool().all_tools().await;
    print_status(&host.pool().status());
    Ok(())
}

/// Parse a JSON argument string; absent means no arguments.
pub(crate) fn parse_args(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw.map(str::trim) {
        None | Some("") => Ok(serde_json::json!({})),
        Some(text) => serde_json::from_str(text).context("Arguments must be valid JSON"),
    }
}

pub(crate) fn print_result(result: &ToolResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

pub(crate) fn print_status(statuses: &[WorkerStatus]) {
    for status in statuses {
        println!("{}", format_status_line(status));
    }
}

fn format_tool_line(name: &str, worker: &str, description: &str) -> String {
    let description = description.lines().next().unwrap_or_default();
    if description.is_empty() {
        format!("{name}  [{worker}]")
    } else {
        format!("{name}  [{worker}]  {description}")
    }
}

fn format_status_line(status: &WorkerStatus) -> String {
    let mut line = format!(
        "{:<16} {:<12} {} tools",
        status.name,
        status.state.to_string(),
        status.tool_count
    );
    if let Some(server) = &status.server {
        line.push_str(&format!("  ({server})"));
    }
    if let Some(at) = status.connected_at {
        line.push_str(&format!("  since {}", at.format("%H:%M:%S")));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!("  error: {error}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_mcp::ConnectionState;

    #[test]
    fn test_parse_args_defaults_to_empty_object() {
        assert_eq!(parse_args(None).unwrap(), serde_json::json!({}));
        assert_eq!(parse_args(Some("  ")).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_parse_args_json() {
        let args = parse_args(Some(r#"{"numbers": [40, 2]}"#)).unwrap();
        assert_eq!(args["numbers"][1], 2);
        assert!(parse_args(Some("{numbers")).is_err());
    }

    #[test]
    fn test_parse_batch() {
        let calls = parse_batch(
            r#"[{"name": "add", "arguments": {"numbers": [15, 27]}}, {"name": "list_files"}]"#,
        )
        .unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments["numbers"][1], 27);
        assert_eq!(calls[1].arguments, serde_json::json!({}));
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_parse_batch_rejects_bad_shapes() {
        assert!(parse_batch(r#"{"name": "add"}"#).is_err());
        assert!(parse_batch(r#"[{"arguments": {}}]"#).is_err());
        assert!(parse_batch("not json").is_err());
    }

    #[test]
    fn test_format_tool_line() {
        assert_eq!(
            format_tool_line("add", "calc", "Add numbers\nMore detail"),
            "add  [calc]  Add numbers"
        );
        assert_eq!(format_tool_line("add", "calc", ""), "add  [calc]");
    }

    #[test]
    fn test_format_status_line_with_error() {
        let status = WorkerStatus {
            name: "broken".into(),
            state: ConnectionState::Disconnected,
            tool_count: 0,
            server: None,
            connected_at: None,
            last_error: Some("spawn failed".into()),
        };
        let line = format_status_line(&status);
        assert!(line.starts_with("broken"));
        assert!(line.contains("0 tools"));
        assert!(line.ends_with("error: spawn failed"));
    }

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::try_parse_from([
            "relay",
            "--lifetime",
            "ephemeral",
            "call",
            "add",
            r#"{"numbers":[1]}"#,
        ])
        .unwrap();
        assert_eq!(cli.lifetime, Some(LifetimePolicy::Ephemeral));
        match cli.command {
            Command::Call { tool, args } => {
                assert_eq!(tool, "add");
                assert!(args.is_some());
            }
            _ => panic!("Expected call"),
        }
    }
}
