//! Interactive session (default mode).
//!
//! One loop multiplexes stdin commands, operation messages and Ctrl+C, so a
//! run can be cancelled or superseded while it streams.

use std::io::Write;

use anyhow::{Context, Result};
use hitl_core::core::{Decision, Orchestrator, RunState, interrupt};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::SessionContext;
use crate::render;

const DEFAULT_LOG_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Start(Option<String>),
    Decide(Decision),
    Cancel,
    Reset,
    Status,
    Log(usize),
    Help,
    Quit,
    Empty,
}

fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(head, rest)| (head, rest.trim()));

    match head.to_ascii_lowercase().as_str() {
        "" => Ok(Command::Empty),
        "start" => Ok(Command::Start((!rest.is_empty()).then(|| rest.to_string()))),
        "cancel" => Ok(Command::Cancel),
        "reset" => Ok(Command::Reset),
        "status" => Ok(Command::Status),
        "log" if rest.is_empty() => Ok(Command::Log(DEFAULT_LOG_LINES)),
        "log" => rest
            .parse()
            .map(Command::Log)
            .map_err(|_| format!("Invalid entry count '{rest}'")),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        _ if rest.is_empty() => head
            .parse::<Decision>()
            .map(Command::Decide)
            .map_err(|_| format!("Unknown command '{head}'; type `help`")),
        _ => Err(format!("Unknown command '{head}'; type `help`")),
    }
}

fn execute(orch: &mut Orchestrator, command: Command) {
    let result = match command {
        Command::Start(topic) => orch.start(topic.as_deref()),
        Command::Decide(decision) => orch.resume(decision),
        Command::Cancel => orch.cancel(),
        Command::Reset => orch.reset(),
        Command::Status => {
            render::status(orch);
            return;
        }
        Command::Log(limit) => {
            render::journal(orch.session().journal(), limit);
            return;
        }
        Command::Help => {
            render::help();
            return;
        }
        Command::Quit | Command::Empty => return,
    };
    match result {
        Ok(events) => render::events(&events, true),
        Err(err) => render::failure(&err),
    }
}

/// What the user can do next.
fn hint(state: RunState) -> &'static str {
    if !state.decisions().is_empty() {
        " (accept/retry/reject)"
    } else if state.can_cancel() {
        " (cancel)"
    } else if state.can_start() {
        " (start [topic])"
    } else if state.can_reset() {
        " (reset)"
    } else {
        ""
    }
}

fn prompt(orch: &Orchestrator) {
    let state = orch.state();
    print!("{state}{}> ", hint(state));
    let _ = std::io::stdout().flush();
}

pub async fn run(ctx: &SessionContext) -> Result<()> {
    let (mut orch, mut inbox) = ctx.open();

    println!(
        "hitl {} · server {}",
        env!("CARGO_PKG_VERSION"),
        orch.base_url()
    );
    println!("Type `help` for commands.");
    if orch.rehydrate() {
        eprintln!("· checking saved thread");
    } else {
        prompt(&orch);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut quit_armed = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    break;
                };
                if quit_armed {
                    quit_armed = false;
                    interrupt::reset();
                }
                match parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(&mut orch, command),
                    Err(message) => eprintln!("{message}"),
                }
                if !orch.is_busy() {
                    prompt(&orch);
                }
            }
            Some(tagged) = inbox.recv() => {
                render::events(&orch.handle(tagged), true);
                if !orch.is_busy() {
                    prompt(&orch);
                }
            }
            () = interrupt::wait_for_interrupt(), if !quit_armed => {
                if orch.state().can_cancel() {
                    interrupt::reset();
                    execute(&mut orch, Command::Cancel);
                } else {
                    quit_armed = true;
                    eprintln!();
                    eprintln!("(Ctrl+C again or `quit` to exit)");
                }
            }
        }
    }

    println!();
    Ok(())
}
