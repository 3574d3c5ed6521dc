use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use agentic_browser::events::{ProgressEvent, ProgressSink};

const PORT_ATTEMPTS: u16 = 10;

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<String>,
    progress: ProgressSink,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

/// Serve the web UI on the first free port from `port` upwards. Returns the
/// queue of submitted commands and the bound port.
pub async fn start_server(progress: ProgressSink, port: u16) -> Result<(mpsc::Receiver<String>, u16)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let state = Arc::new(AppState { cmd_tx, progress });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(listener) => {
                bound = Some((listener, p));
                break;
            }
            Err(e) => debug!(port = p, error = %e, "port unavailable"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind any port in {}-{}; is another agent running?",
            port,
            port.saturating_add(PORT_ATTEMPTS - 1)
        )
    })?;

    info!(url = %format!("http://localhost:{port}"), "web UI running");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "web server stopped");
        }
    });

    Ok((cmd_rx, port))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> (StatusCode, &'static str) {
    let command = payload.command.trim().to_string();
    if command.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty command");
    }
    info!(command = %command, "command received");
    match state.cmd_tx.send(command).await {
        Ok(()) => (StatusCode::ACCEPTED, "queued"),
        Err(_) => {
            warn!("agent loop is gone, dropping command");
            (StatusCode::SERVICE_UNAVAILABLE, "agent stopped")
        }
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.progress.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(e) => {
            debug!(error = %e, "slow SSE client skipped events");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Browser Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0a0a0f; color: #e0e0e0; font-family: system-ui, sans-serif; height: 100vh; display: flex; flex-direction: column; }
  header { padding: 20px 32px; border-bottom: 1px solid #1a1a2e; display: flex; align-items: center; gap: 12px; }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  .dot.busy { background: #f59e0b; }
  .main { flex: 1; display: flex; flex-direction: column; max-width: 860px; width: 100%; margin: 0 auto; padding: 24px 32px; gap: 16px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; line-height: 1.5; white-space: pre-wrap; }
  .user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .step { color: #6366f1; font-weight: 700; }
  .tool { background: #111118; border-left: 3px solid #3b82f6; font-family: monospace; font-size: 13px; }
  .thinking, .subagent { background: #111118; border-left: 3px solid #f59e0b; color: #fcd34d; }
  .ok { border-left: 3px solid #22c55e; background: #0a140a; }
  .error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .done { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .input-area { display: flex; gap: 8px; }
  #cmd { flex: 1; background: #111118; border: 1px solid #222; border-radius: 8px; padding: 12px 16px; color: #fff; font-size: 16px; outline: none; }
  #cmd:disabled { opacity: 0.5; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 8px; padding: 12px 24px; font-size: 15px; font-weight: 600; cursor: pointer; }
  button:disabled { background: #333; cursor: not-allowed; }
</style>
</head>
<body>
  <header><div class="dot" id="status-dot"></div><h1>Browser Agent</h1></header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="cmd" placeholder="Tell the agent what to do..." autofocus />
      <button id="send" onclick="send()">Send</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const sendBtn = document.getElementById('send');
  const dot = document.getElementById('status-dot');
  let busy = false;

  function addEntry(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    busy = b;
    cmd.disabled = b;
    sendBtn.disabled = b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) cmd.focus();
  }

  async function send() {
    const text = cmd.value.trim();
    if (!text || busy) return;
    cmd.value = '';
    addEntry('user', 'You: ' + text);
    setBusy(true);
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));

  on('step', d => addEntry('step', 'Step ' + d.step));
  on('thinking', d => addEntry('thinking', d.reasoning));
  on('tool_selected', d => addEntry('tool', d.tool + ' ' + d.params.map(p => p[0] + '=' + p[1]).join(' ')));
  on('result', d => addEntry(d.success ? 'ok' : 'error', d.message));
  on('subagent_thinking', d => addEntry('subagent', d.message));
  on('subagent_result', d => addEntry('subagent', d.message));
  on('error', d => addEntry('error', d.message));
  on('task_complete', d => { addEntry('done', 'Done: ' + d.result); setBusy(false); });
  on('task_failed', d => { addEntry('error', 'Task failed: ' + d.message); setBusy(false); });

  addEntry('done', 'Agent ready. Type a command to begin.');
</script>
</body>
</html>
"##;
