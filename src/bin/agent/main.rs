mod face;
mod repl;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use agentic_browser::agent::{LoopSettings, Orchestrator};
use agentic_browser::browser::{ActionExecutor, BrowserHandle, ChromeBrowser, DomSnapshot, TabManager};
use agentic_browser::events::ProgressSink;
use agentic_browser::llm::{AnthropicClient, Brain, DomAnalyst};
use agentic_browser::security::{ConfirmChannel, SecurityGate, TerminalConfirm};
use agentic_browser::{Config, Task, logging};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "agent", version, about = "Autonomous browser agent")]
struct Cli {
    /// Run Chrome without a window.
    #[arg(long, global = true)]
    headless: bool,

    /// Skip the security gate entirely.
    #[arg(long, global = true)]
    no_security: bool,

    /// Allow high-risk actions without asking. Critical ones still need a yes.
    #[arg(long, global = true)]
    auto_confirm: bool,

    /// Overrides LOG_LEVEL; RUST_LOG still wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task, or prompt for tasks interactively.
    Run { task: Option<String> },
    /// Web UI: POST /command queues a task, GET /events streams progress.
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if self.headless {
            config.browser.headless = true;
        }
        if self.no_security {
            config.security.enabled = false;
        }
        if self.auto_confirm {
            config.security.auto_confirm = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    let _log_guard = logging::init(&config.logging)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let command = cli.command.unwrap_or(Command::Run { task: None });
    let channel: Option<Arc<dyn ConfirmChannel>> = match command {
        Command::Run { .. } => Some(Arc::new(TerminalConfirm)),
        Command::Serve { .. } => None,
    };

    let mut orchestrator = build(&config, channel, ProgressSink::default()).await?;

    let outcome = match command {
        Command::Run { task } => repl::run(&mut orchestrator, task, &cancel).await,
        Command::Serve { port } => serve(&mut orchestrator, port, &cancel).await,
    };

    info!("shutting down browser");
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, orchestrator.executor().tabs().shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "browser shutdown failed"),
        Err(_) => warn!(timeout = ?SHUTDOWN_TIMEOUT, "browser shutdown timed out"),
    }
    outcome
}

async fn build(
    config: &Config,
    channel: Option<Arc<dyn ConfirmChannel>>,
    progress: ProgressSink,
) -> Result<Orchestrator> {
    let client = AnthropicClient::new(&config.llm)?;
    info!(model = client.model(), "decision source ready");

    info!(headless = config.browser.headless, "launching Chrome");
    let browser_config = config.browser.clone();
    let browser = tokio::task::spawn_blocking(move || ChromeBrowser::launch(&browser_config))
        .await
        .map_err(|e| anyhow!("Browser launch panicked: {}", e))??;
    let browser: Arc<dyn BrowserHandle> = Arc::new(browser);

    let timeouts = config.browser.timeouts;
    let tabs = TabManager::new(browser, timeouts).await?;
    let snapshot = Arc::new(DomSnapshot::new(tabs.active_tab()));
    let executor = ActionExecutor::new(tabs, timeouts, &config.agent.screenshots_dir);
    let gate = SecurityGate::new(config.security, channel);

    let orchestrator = Orchestrator::new(
        Box::new(Brain::new(client.clone())),
        snapshot,
        gate,
        executor,
        progress,
        LoopSettings::from(&config.agent),
    )
    .with_diagnostic(Arc::new(DomAnalyst::new(client)));
    Ok(orchestrator)
}

async fn serve(orchestrator: &mut Orchestrator, port: u16, cancel: &CancellationToken) -> Result<()> {
    let (mut commands, port) = face::start_server(orchestrator.progress().clone(), port).await?;
    eprintln!("Web UI running at http://localhost:{port}");

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => command,
        };
        let Some(command) = command else {
            break;
        };
        run_task(orchestrator, &command, cancel).await;
    }
    Ok(())
}

/// Run one task to its end. Failures are reported, not propagated: the next
/// task gets a fresh start.
pub(crate) async fn run_task(orchestrator: &mut Orchestrator, description: &str, cancel: &CancellationToken) {
    let mut task = Task::new(description);
    match orchestrator.execute(&mut task, cancel).await {
        Ok(result) => info!(task_id = %task.id, result = %result, "task completed"),
        Err(failure) => error!(task_id = %task.id, error = %failure, "task failed"),
    }
}
