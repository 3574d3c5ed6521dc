use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DecisionSource, DiagnosticAgent, NegativeGuard, SnapshotProvider};
use crate::browser::{ActionExecutor, format_failure};
use crate::config::AgentConfig;
use crate::error::{AgentError, StepFailure};
use crate::events::{ProgressEvent, ProgressSink};
use crate::security::{SecurityGate, Verdict};
use crate::types::{ActionResult, Decision, Intent, Task};

/// Knobs of the step loop, taken from [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub failure_threshold: u32,
    pub guard: NegativeGuard,
    pub diagnostic_timeout: Duration,
}

impl From<&AgentConfig> for LoopSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            guard: NegativeGuard::new(&config.negative_phrases, config.negative_guard_steps),
            diagnostic_timeout: config.diagnostic_timeout,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// Back-to-back failures within the current task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureState {
    pub consecutive: u32,
    pub last_failed: String,
}

enum StepOutcome {
    Continue,
    Complete(String),
}

/// Runs one task at a time: snapshot, decide, gate, execute, report, repeat.
pub struct Orchestrator {
    source: Box<dyn DecisionSource>,
    snapshot: Arc<dyn SnapshotProvider>,
    diagnostic: Option<Arc<dyn DiagnosticAgent>>,
    gate: SecurityGate,
    executor: ActionExecutor,
    progress: ProgressSink,
    settings: LoopSettings,
    failures: FailureState,
}

impl Orchestrator {
    pub fn new(
        source: Box<dyn DecisionSource>,
        snapshot: Arc<dyn SnapshotProvider>,
        gate: SecurityGate,
        executor: ActionExecutor,
        progress: ProgressSink,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            snapshot,
            diagnostic: None,
            gate,
            executor,
            progress,
            settings,
            failures: FailureState::default(),
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: Arc<dyn DiagnosticAgent>) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }

    pub fn failures(&self) -> &FailureState {
        &self.failures
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Drive `task` until the decision source completes it, a step fails
    /// fatally, or `cancel` fires. No step ceiling.
    pub async fn execute(
        &mut self,
        task: &mut Task,
        cancel: &CancellationToken,
    ) -> Result<String, StepFailure> {
        task.start().map_err(|error| StepFailure { step: 0, error })?;
        self.failures = FailureState::default();
        self.source.new_conversation();
        info!(task_id = %task.id, task = %task.description, "task started");

        let mut step = 0;
        loop {
            step += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                outcome = self.step(step, &task.description) => outcome,
            };

            match outcome {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Complete(result)) => {
                    task.complete(result.clone())
                        .map_err(|error| StepFailure { step, error })?;
                    info!(task_id = %task.id, step, result = %result, "task completed");
                    self.progress.emit(ProgressEvent::TaskComplete {
                        result: result.clone(),
                    });
                    return Ok(result);
                }
                Err(err) => {
                    error!(task_id = %task.id, step, error = %err, "task failed");
                    self.progress.emit(ProgressEvent::Error {
                        message: err.to_string(),
                    });
                    if let Err(e) = task.fail(&err) {
                        warn!(error = %e, "could not record task failure");
                    }
                    self.progress.emit(ProgressEvent::TaskFailed {
                        message: format!("step {step}: {err}"),
                    });
                    return Err(StepFailure { step, error: err });
                }
            }
        }
    }

    async fn step(&mut self, step: usize, description: &str) -> Result<StepOutcome, AgentError> {
        self.progress.emit(ProgressEvent::Step { step });

        let page = self
            .snapshot
            .page_context()
            .await
            .map_err(AgentError::Snapshot)?;
        debug!(step, url = %page.url, elements = page.interactive_elements.len(), "snapshot taken");

        let task_text = if step == 1 { description } else { "" };
        self.source.add_user_message(task_text, &page);

        self.progress.emit(ProgressEvent::Waiting);
        let decision = self
            .source
            .decide_next_action()
            .await
            .map_err(AgentError::DecisionSource)?;

        let tool = decision.intent.kind().to_string();
        if !decision.reasoning.is_empty() {
            self.progress.emit(ProgressEvent::Thinking {
                reasoning: decision.reasoning.clone(),
                tool: tool.clone(),
            });
        }
        self.progress.emit(ProgressEvent::ToolSelected {
            tool: tool.clone(),
            params: decision
                .intent
                .params()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        });
        info!(step, intent = %decision.intent.describe(), "intent selected");

        if decision.complete {
            return Ok(self.try_complete(step, decision));
        }

        match self.gate.check(&decision.intent, Some(&page)) {
            Verdict::Allow => {}
            Verdict::Block(risk) => {
                return Err(AgentError::SecurityBlocked {
                    level: risk.level,
                    reason: risk.reason,
                });
            }
            Verdict::Rejected(risk) => {
                info!(step, reason = %risk.reason, "action rejected, cancelling task");
                return Err(AgentError::UserRejected);
            }
            Verdict::Notice(risk) => {
                let mut text = format!("Blocked: {} ({} risk).", risk.reason, risk.level);
                if !risk.suggestions.is_empty() {
                    text.push_str(&format!(" {}", risk.suggestions.join(" ")));
                }
                warn!(step, intent = %decision.intent.describe(), reason = %risk.reason, "action not executed");
                self.progress.emit(ProgressEvent::Result {
                    tool,
                    message: text.clone(),
                    success: false,
                });
                if decision.tool_call_id.is_empty() {
                    warn!(intent = %decision.intent.describe(), "decision has no tool call id, notice not reported");
                } else {
                    self.source.add_tool_result(&decision.tool_call_id, &text, true);
                }
                return Ok(StepOutcome::Continue);
            }
        }

        let mut result = match &decision.intent {
            Intent::QueryDom { query } => self.query_dom(&decision.intent, query).await,
            Intent::AnalyzePage { question } => {
                self.analyze_page(&decision.intent, question).await
            }
            intent => self.executor.execute(intent).await,
        };

        self.track(&decision.intent, &mut result).await;
        self.report(&decision, &result);
        Ok(StepOutcome::Continue)
    }

    fn try_complete(&mut self, step: usize, decision: Decision) -> StepOutcome {
        let result = decision.result_text;
        if let Some(phrase) = self.settings.guard.rejects(step, &result) {
            warn!(step, phrase, result = %result, "premature completion rejected");
            let corrective = NegativeGuard::corrective(phrase);
            self.progress.emit(ProgressEvent::Result {
                tool: decision.intent.kind().to_string(),
                message: corrective.clone(),
                success: false,
            });
            self.source
                .add_tool_result(&decision.tool_call_id, &corrective, true);
            return StepOutcome::Continue;
        }
        StepOutcome::Complete(result)
    }

    /// Update the failure streak; escalate to the diagnostic agent once the
    /// streak reaches the threshold.
    async fn track(&mut self, intent: &Intent, result: &mut ActionResult) {
        if result.success {
            self.failures = FailureState::default();
            return;
        }
        self.failures.consecutive += 1;
        self.failures.last_failed = intent.describe();
        debug!(consecutive = self.failures.consecutive, last = %self.failures.last_failed, "failure recorded");

        if self.failures.consecutive < self.settings.failure_threshold {
            return;
        }
        let Some(diagnostic) = self.diagnostic.clone() else {
            return;
        };

        info!(consecutive = self.failures.consecutive, "escalating to page analyst");
        self.progress.emit(ProgressEvent::SubagentThinking {
            message: format!(
                "{} failures in a row, analysing the page",
                self.failures.consecutive
            ),
        });

        let html = self.html_or_empty().await;
        let live = self.live_or_empty("").await;
        let call = diagnostic.analyze_error(&html, &live, &self.failures.last_failed, &result.message);
        match tokio::time::timeout(self.settings.diagnostic_timeout, call).await {
            Ok(Ok(analysis)) => {
                self.progress.emit(ProgressEvent::SubagentResult {
                    message: analysis.clone(),
                });
                result.message.push_str("\n\nAnalysis:\n");
                result.message.push_str(&analysis);
            }
            Ok(Err(e)) => warn!(error = %e, "page analyst failed"),
            Err(_) => warn!(timeout = ?self.settings.diagnostic_timeout, "page analyst timed out"),
        }
    }

    async fn query_dom(&self, intent: &Intent, query: &str) -> ActionResult {
        self.progress.emit(ProgressEvent::SubagentThinking {
            message: format!("Scanning the page for \"{query}\""),
        });
        match self.snapshot.find_elements_live(query).await {
            Ok(listing) => {
                self.progress.emit(ProgressEvent::SubagentResult {
                    message: listing.clone(),
                });
                let message = format!(
                    "{listing}\n\nUse one of the selectors above with click, or click_at_position with its coordinates."
                );
                ActionResult::ok(intent, message).with_query_result(listing)
            }
            Err(e) => ActionResult::fail(intent, format!("DOM query failed: {e:#}")),
        }
    }

    async fn analyze_page(&self, intent: &Intent, question: &str) -> ActionResult {
        let Some(diagnostic) = self.diagnostic.as_ref() else {
            return ActionResult::fail(intent, "No page analyst is configured.");
        };
        self.progress.emit(ProgressEvent::SubagentThinking {
            message: format!("Analysing the page: {question}"),
        });
        let html = self.html_or_empty().await;
        let live = self.live_or_empty("").await;
        let call = diagnostic.analyze(&html, &live, question);
        match tokio::time::timeout(self.settings.diagnostic_timeout, call).await {
            Ok(Ok(analysis)) => {
                self.progress.emit(ProgressEvent::SubagentResult {
                    message: analysis.clone(),
                });
                ActionResult::ok(intent, analysis.clone()).with_query_result(analysis)
            }
            Ok(Err(e)) => ActionResult::fail(intent, format!("Page analysis failed: {e:#}")),
            Err(_) => ActionResult::fail(intent, "Page analysis timed out."),
        }
    }

    async fn html_or_empty(&self) -> String {
        self.snapshot.html().await.unwrap_or_else(|e| {
            warn!(error = %e, "could not read page html");
            String::new()
        })
    }

    async fn live_or_empty(&self, query: &str) -> String {
        self.snapshot
            .find_elements_live(query)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not scan live elements");
                String::new()
            })
    }

    fn report(&mut self, decision: &Decision, result: &ActionResult) {
        self.progress.emit(ProgressEvent::Result {
            tool: result.intent_kind.clone(),
            message: result.message.clone(),
            success: result.success,
        });

        if decision.tool_call_id.is_empty() {
            warn!(intent = %decision.intent.describe(), "decision has no tool call id, result not reported");
            return;
        }
        let id = &decision.tool_call_id;
        if !result.success && result.error_context.is_some() {
            self.source.add_tool_result(id, &format_failure(result), true);
        } else if let Some(shot) = &result.screenshot {
            self.source
                .add_tool_result_with_image(id, &result.message, &shot.base64, !result.success);
        } else {
            self.source.add_tool_result(id, &result.message, !result.success);
        }
    }
}
