//! CLI command implementations

use crate::SourceArgs;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use stepbox_common::{
    ExecutionEvent, ExecutionMode, ExecutionOutcome, ExecutionRequest, HostCommand,
    SessionMessage, Snapshot, StdStream,
};
use stepbox_sandbox::{HostBridge, Instrumenter, RunHandle, SandboxConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Build a request from a source file and CLI arguments
pub fn load_request(source: &SourceArgs, mode: ExecutionMode) -> Result<ExecutionRequest> {
    let source_text = std::fs::read_to_string(&source.file)
        .with_context(|| format!("Failed to read {}", source.file.display()))?;
    let arguments: Vec<Value> =
        serde_json::from_str(&source.args).context("--args must be a JSON array")?;

    Ok(ExecutionRequest {
        source_text,
        entry_point_name: source.entry.clone(),
        arguments,
        mode,
        timeout_ms: source.timeout_ms,
    })
}

/// Run to completion, printing events as they arrive
pub async fn execute_run(bridge: HostBridge, request: ExecutionRequest, json: bool) -> Result<()> {
    let mut handle = bridge.start(request).await;
    debug!(execution_id = %handle.id(), "run started");

    while let Some(message) = handle.next_message().await {
        if json {
            println!("{}", serde_json::to_string(&message)?);
            if message.is_outcome() {
                break;
            }
            continue;
        }
        match message {
            SessionMessage::Event(event) => print_event(&event),
            SessionMessage::Outcome(outcome) => return report_outcome(outcome),
        }
    }
    Ok(())
}

/// Interactive manual mode
pub async fn execute_step(bridge: HostBridge, request: ExecutionRequest) -> Result<()> {
    let mut controller = bridge.start_manual(request).await;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    while let Some(snapshot) = controller.next_snapshot().await {
        print_snapshot(controller.history().len() - 1, &snapshot);
        loop {
            eprint!("[step|resume|back N|line N|terminate] > ");
            let Some(line) = stdin.next_line().await? else {
                controller.terminate();
                break;
            };
            let mut words = line.split_whitespace();
            match words.next().unwrap_or("step") {
                "s" | "step" => {
                    controller.step();
                    break;
                }
                "r" | "resume" => {
                    controller.resume();
                    break;
                }
                "b" | "back" => {
                    let index = words.next().and_then(|w| w.parse::<usize>().ok());
                    match index.and_then(|i| controller.snapshot_at(i).map(|s| (i, s))) {
                        Some((i, snapshot)) => print_snapshot(i, snapshot),
                        None => eprintln!("no snapshot with that index (0..{})", controller.history().len()),
                    }
                }
                "l" | "line" => {
                    let line = words.next().and_then(|w| w.parse::<u32>().ok());
                    let found = line.and_then(|line| controller.history().rfind_line(line));
                    match found.and_then(|i| controller.snapshot_at(i).map(|s| (i, s))) {
                        Some((i, snapshot)) => print_snapshot(i, snapshot),
                        None => eprintln!("no snapshot recorded at that line"),
                    }
                }
                "q" | "terminate" => {
                    controller.terminate();
                    break;
                }
                other => eprintln!("unknown command '{}'", other),
            }
        }
    }

    match controller.wait().await {
        Some(outcome) => report_outcome(outcome),
        None => bail!("run ended without an outcome"),
    }
}

/// Print the instrumented program
pub fn execute_instrument(
    config: &SandboxConfig,
    file: &Path,
    entry: &str,
    mode: ExecutionMode,
) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let program = Instrumenter::new(config.snapshot).instrument(&source, entry, mode)?;
    println!("{}", program.source);
    eprintln!(
        "// {} statement lines, {} captured names, body starts after line {}",
        program.statement_count,
        program.names.len(),
        program.line_map.header_lines()
    );
    Ok(())
}

/// One line of the serve protocol: a new request or a command for the
/// active run
#[derive(Deserialize)]
#[serde(untagged)]
enum Inbound {
    Command(HostCommand),
    Request(ExecutionRequest),
}

/// JSON-lines protocol: requests and commands on stdin, events and outcomes
/// on stdout. One run is active at a time.
pub async fn execute_serve(bridge: HostBridge) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut active: Option<RunHandle> = None;
    let mut input_open = true;

    while input_open || active.is_some() {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read stdin")? {
                    None => input_open = false,
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<Inbound>(&line) {
                        Ok(Inbound::Request(request)) => {
                            if active.is_some() {
                                warn!("request ignored: a run is already active");
                            } else {
                                active = Some(bridge.start(request).await);
                            }
                        }
                        Ok(Inbound::Command(command)) => match &active {
                            Some(handle) => handle.send(command),
                            None => debug!(?command, "command ignored: no active run"),
                        },
                        Err(e) => warn!(error = %e, "unreadable input line"),
                    },
                }
            }
            message = next_message(&mut active) => {
                match message {
                    Some(message) => {
                        let mut text = serde_json::to_string(&message)?;
                        text.push('\n');
                        stdout.write_all(text.as_bytes()).await?;
                        stdout.flush().await?;
                        if message.is_outcome() {
                            active = None;
                            bridge.cleanup_completed().await;
                        }
                    }
                    None => active = None,
                }
            }
        }
    }
    Ok(())
}

async fn next_message(active: &mut Option<RunHandle>) -> Option<SessionMessage> {
    match active {
        Some(handle) => handle.next_message().await,
        None => std::future::pending().await,
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::Step(step) => println!("step     {}", step.line),
        ExecutionEvent::Snapshot(snapshot) => {
            let vars: Vec<String> = snapshot
                .variables
                .iter()
                .map(|var| format!("{}={}", var.name, var.serialized_value))
                .collect();
            println!("snapshot {} {}", snapshot.line, vars.join(" "));
        }
        ExecutionEvent::Stdout(out) => match out.stream {
            StdStream::Stdout => println!("stdout   {} | {}", out.line, out.text),
            StdStream::Stderr => println!("stderr   {} | {}", out.line, out.text),
        },
        ExecutionEvent::WrapperError { message, line } => match line {
            Some(line) => println!("error    {} | {}", line, message),
            None => println!("error    {}", message),
        },
    }
}

fn print_snapshot(index: usize, snapshot: &Snapshot) {
    println!("#{} line {}", index, snapshot.line);
    for frame in &snapshot.call_stack {
        println!("  in {}", frame.name);
    }
    for var in &snapshot.variables {
        let marker = if var.changed { "*" } else { " " };
        println!("  {}{} = {}", marker, var.name, var.serialized_value);
    }
}

fn report_outcome(outcome: ExecutionOutcome) -> Result<()> {
    match outcome {
        ExecutionOutcome::Success { value } => {
            println!("=> {}", value);
            Ok(())
        }
        ExecutionOutcome::Failure {
            message,
            line: Some(line),
        } => bail!("line {}: {}", line, message),
        ExecutionOutcome::Failure { message, line: None } => bail!("{}", message),
    }
}
