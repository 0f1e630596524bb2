//! Line-oriented shell over a pooled set of workers.

use anyhow::Result;
use relay_mcp::ToolHost;
use relay_types::ToolCall;
use std::io::{self, BufRead, Write};

#[derive(Debug, PartialEq)]
enum ShellCommand<'a> {
    Tools,
    Call { tool: &'a str, args: Option<&'a str> },
    Restart(Option<&'a str>),
    Status,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_command(input: &str) -> ShellCommand<'_> {
    let (cmd, rest) = match input.split_once(char::is_whitespace) {
        Some((c, r)) => (c, Some(r.trim()).filter(|r| !r.is_empty())),
        None => (input, None),
    };

    match cmd {
        "tools" => ShellCommand::Tools,
        "call" => match rest {
            Some(rest) => {
                let (tool, args) = match rest.split_once(char::is_whitespace) {
                    Some((t, a)) => (t, Some(a.trim())),
                    None => (rest, None),
                };
                ShellCommand::Call { tool, args }
            }
            None => ShellCommand::Unknown(input),
        },
        "restart" => ShellCommand::Restart(rest),
        "status" => ShellCommand::Status,
        "help" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        _ => ShellCommand::Unknown(input),
    }
}

pub async fn run(host: &ToolHost) -> Result<()> {
    let stdin = io::stdin();

    eprintln!(
        "relay v{} ({} workers configured)",
        env!("CARGO_PKG_VERSION"),
        host.pool().worker_names().count()
    );
    eprintln!("Type 'help' for commands. Press Ctrl+D to exit.\n");

    loop {
        eprint!("relay> ");
        io::stderr().flush()?;

        let mut input = String::new();
        let bytes_read = stdin.lock().read_line(&mut input)?;
        if bytes_read == 0 {
            eprintln!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match parse_command(input) {
            ShellCommand::Quit => break,
            ShellCommand::Help => print_help(),
            ShellCommand::Tools => super::list_tools(host).await?,
            ShellCommand::Status => super::print_status(&host.pool().status()),
            ShellCommand::Call { tool, args } => {
                let arguments = match super::parse_args(args) {
                    Ok(a) => a,
                    Err(e) => {
                        eprintln!("{e:#}");
                        continue;
                    }
                };
                let call = ToolCall::new(tool, arguments);
                let result = host.turn(|tools| async move { tools.call(call).await }).await;
                super::print_result(&result)?;
            }
            ShellCommand::Restart(Some(name)) => match host.close(name).await {
                Ok(()) => eprintln!("Closed '{name}'; it reconnects on next use."),
                Err(e) => eprintln!("{e}"),
            },
            ShellCommand::Restart(None) => {
                host.close_all().await;
                eprintln!("Closed all workers; they reconnect on next use.");
            }
            ShellCommand::Unknown(_) => {
                eprintln!("Unknown command: {input}. Type 'help' for available commands.");
            }
        }
    }

    Ok(())
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  tools                 List available tools");
    eprintln!("  call <tool> [json]    Call a tool with JSON arguments");
    eprintln!("  restart [worker]      Close one worker, or all of them");
    eprintln!("  status                Show worker status");
    eprintln!("  quit                  Exit");
}
