use crate::output::{event_line, print_json, print_tree, tree};
use crate::session::Session;
use anyhow::Context;
use sequencer_core::{
    EntityStatus, Executor, ExternalState, MemoryState, ProgressSink, RunContext, RunOutcome,
    SequenceRootContainer, StatusEvent,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub fn run(config: &Path, file: &Path, sets: &[String], json: bool) -> anyhow::Result<()> {
    let session = Session::load(config)?;
    let mut root = session.open(file)?;

    let issues = root.validate();
    if !issues.is_empty() {
        for issue in &issues {
            warn!(
                name = %issue.name,
                discriminator = %issue.discriminator,
                "{}",
                issue.message
            );
        }
        anyhow::bail!(
            "{} has {} validation issue(s); see `sequencer validate`",
            file.display(),
            issues.len()
        );
    }

    let state = MemoryState::new();
    for raw in sets {
        let (key, value) = parse_assignment(raw)?;
        state.set(&key, value);
    }

    let sink = session.config.progress_sink();
    let ctx = RunContext::new()
        .with_state(Arc::new(state.clone()))
        .with_progress(sink.clone());

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let (outcome, events) = runtime.block_on(drive(&mut root, &ctx, &sink, json))?;

    if json {
        let failures: Vec<String> = outcome.failures.iter().map(|e| e.to_string()).collect();
        print_json(&serde_json::json!({
            "name": root.name(),
            "status": outcome.status,
            "cancelled": outcome.cancelled,
            "started_at": outcome.started_at,
            "finished_at": outcome.finished_at,
            "duration_ms": outcome.duration().num_milliseconds(),
            "failures": failures,
            "events": events,
            "entities": tree(&root),
            "state": state.snapshot(),
        }))?;
    } else {
        println!();
        print_tree(&tree(&root));
        println!();
        for failure in &outcome.failures {
            println!("failure: {failure}");
        }
        let seconds = outcome.duration().num_milliseconds() as f64 / 1000.0;
        let note = if outcome.cancelled { " (cancelled)" } else { "" };
        println!("{}: {}{note} in {seconds:.2}s", root.name(), outcome.status);
    }

    if outcome.status == EntityStatus::Failed {
        anyhow::bail!("sequence '{}' failed", root.name());
    }
    Ok(())
}

/// Runs `root` while echoing status events; the first Ctrl+C cancels.
async fn drive(
    root: &mut SequenceRootContainer,
    ctx: &RunContext,
    sink: &ProgressSink,
    json: bool,
) -> anyhow::Result<(RunOutcome, Vec<StatusEvent>)> {
    let executor = Executor::new();
    let mut rx = sink.subscribe();
    let mut events = Vec::new();
    let mut interrupted = false;

    let run = executor.run(root, ctx);
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome?,
            received = rx.recv() => match received {
                Ok(event) => record(&mut events, event, json),
                Err(RecvError::Lagged(missed)) => warn!("missed {missed} status events"),
                Err(RecvError::Closed) => {}
            },
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("failed to listen for Ctrl+C")?;
                interrupted = true;
                info!("cancelling run");
                if let Err(e) = executor.cancel() {
                    warn!("cancel failed: {e}");
                }
            }
        }
    };

    // Transitions published after the last poll.
    while let Ok(event) = rx.try_recv() {
        record(&mut events, event, json);
    }
    Ok((outcome, events))
}

fn record(events: &mut Vec<StatusEvent>, event: StatusEvent, json: bool) {
    if !json {
        println!("{}", event_line(&event));
    }
    events.push(event);
}

/// Splits `key=value`. The value is read as JSON when it parses (numbers,
/// booleans, quoted strings) and kept as a plain string otherwise.
fn parse_assignment(raw: &str) -> anyhow::Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("empty key in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
