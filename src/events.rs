use serde::Serialize;
use tokio::sync::broadcast;

/// Progress events for observers (terminal printer, SSE stream).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Step {
        step: usize,
    },
    Waiting,
    Thinking {
        reasoning: String,
        tool: String,
    },
    ToolSelected {
        tool: String,
        params: Vec<(String, String)>,
    },
    Result {
        tool: String,
        message: String,
        success: bool,
    },
    SubagentThinking {
        message: String,
    },
    SubagentResult {
        message: String,
    },
    Error {
        message: String,
    },
    TaskComplete {
        result: String,
    },
    TaskFailed {
        message: String,
    },
}

impl ProgressEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Step { .. } => "step",
            ProgressEvent::Waiting => "waiting",
            ProgressEvent::Thinking { .. } => "thinking",
            ProgressEvent::ToolSelected { .. } => "tool_selected",
            ProgressEvent::Result { .. } => "result",
            ProgressEvent::SubagentThinking { .. } => "subagent_thinking",
            ProgressEvent::SubagentResult { .. } => "subagent_result",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::TaskComplete { .. } => "task_complete",
            ProgressEvent::TaskFailed { .. } => "task_failed",
        }
    }
}

/// Fire-and-forget fan-out. Sending never blocks and never fails the caller;
/// slow subscribers lag and drop events.
#[derive(Clone)]
pub struct ProgressSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_fine() {
        ProgressSink::default().emit(ProgressEvent::Waiting);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(ProgressEvent::Result {
            tool: "click".into(),
            message: "Clicked".into(),
            success: true,
        })
        .unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["tool"], "click");
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let sink = ProgressSink::default();
        let mut rx = sink.subscribe();
        sink.emit(ProgressEvent::Step { step: 1 });
        sink.emit(ProgressEvent::Waiting);
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::Step { step: 1 });
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::Waiting);
    }
}
