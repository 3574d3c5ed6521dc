use anyhow::Result;
use std::io::{BufRead, Write};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use agentic_browser::agent::Orchestrator;
use agentic_browser::events::ProgressEvent;

use crate::run_task;

const RESULT_PREVIEW_CHARS: usize = 300;

/// Run `task` once, or prompt for tasks until `exit`, `quit` or EOF.
pub async fn run(
    orchestrator: &mut Orchestrator,
    task: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let printer = tokio::spawn(print_progress(orchestrator.progress().subscribe()));

    if let Some(task) = task {
        run_task(orchestrator, &task, cancel).await;
    } else {
        eprintln!("Type a task for the agent. `exit` or Ctrl-D to quit.");
        let mut lines = stdin_lines();
        while !cancel.is_cancelled() {
            prompt()?;
            let Some(line) = next_line(&mut lines, cancel).await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }
            run_task(orchestrator, line, cancel).await;
        }
    }

    printer.abort();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    let mut err = std::io::stderr().lock();
    write!(err, "\n> ")?;
    err.flush()
}

/// Stdin lines from a detached thread: a pending read never holds up
/// cancellation or runtime shutdown.
fn stdin_lines() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// `None` on EOF or interrupt.
async fn next_line(
    lines: &mut mpsc::Receiver<std::io::Result<String>>,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        line = lines.recv() => Ok(line.transpose()?),
    }
}

async fn print_progress(mut rx: broadcast::Receiver<ProgressEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "progress printer lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Step { step } => println!("\n[step {step}]"),
        ProgressEvent::Waiting => {}
        ProgressEvent::Thinking { reasoning, .. } => println!("  thinking: {reasoning}"),
        ProgressEvent::ToolSelected { tool, params } => {
            let args: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("  -> {tool} {}", args.join(" "));
        }
        ProgressEvent::Result {
            message, success, ..
        } => {
            let mark = if *success { "ok" } else { "FAILED" };
            println!("  {mark}: {}", preview(message));
        }
        ProgressEvent::SubagentThinking { message } => println!("  analyst: {message}"),
        ProgressEvent::SubagentResult { message } => println!("  analyst says: {}", preview(message)),
        ProgressEvent::Error { message } => println!("  error: {message}"),
        ProgressEvent::TaskComplete { result } => println!("\nDone: {result}"),
        ProgressEvent::TaskFailed { message } => println!("\nTask failed: {message}"),
    }
}

fn preview(text: &str) -> String {
    let first: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
    if first.len() < text.len() {
        format!("{first}...")
    } else {
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn interrupt_ends_a_pending_prompt() {
        let (_tx, mut lines) = mpsc::channel::<std::io::Result<String>>(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let read = tokio::time::timeout(Duration::from_secs(2), next_line(&mut lines, &cancel))
            .await
            .expect("prompt should return on interrupt");
        assert_eq!(read.unwrap(), None);
    }

    #[tokio::test]
    async fn lines_pass_through_until_eof() {
        let (tx, mut lines) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        tx.send(Ok("open example.com".to_string())).await.unwrap();
        drop(tx);

        assert_eq!(
            next_line(&mut lines, &cancel).await.unwrap().as_deref(),
            Some("open example.com")
        );
        assert_eq!(next_line(&mut lines, &cancel).await.unwrap(), None);
    }

    #[test]
    fn long_results_are_cut() {
        let long = "x".repeat(RESULT_PREVIEW_CHARS + 5);
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview("short"), "short");
    }
}
