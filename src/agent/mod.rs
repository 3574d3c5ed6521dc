//! The step loop and the collaborators it talks to.
//!
//! Decision making, page snapshots and diagnosis live behind traits so the loop
//! can be driven by fakes in tests and by the LLM client in the binary.

mod guard;
mod orchestrator;

use async_trait::async_trait;

pub use guard::NegativeGuard;
pub use orchestrator::{FailureState, LoopSettings, Orchestrator};

use crate::types::{Decision, PageContext};

/// Chooses the next intent. Keeps its own conversation state; the loop only
/// appends to it.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    fn new_conversation(&mut self);

    /// `task` is the user's request on the first step and empty afterwards.
    fn add_user_message(&mut self, task: &str, page: &PageContext);

    fn add_tool_result(&mut self, call_id: &str, text: &str, is_error: bool);

    fn add_tool_result_with_image(
        &mut self,
        call_id: &str,
        text: &str,
        image_base64: &str,
        is_error: bool,
    );

    async fn decide_next_action(&mut self) -> anyhow::Result<Decision>;
}

#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn page_context(&self) -> anyhow::Result<PageContext>;

    async fn html(&self) -> anyhow::Result<String>;

    /// Formatted list of clickable elements, filtered by `query` when not empty.
    async fn find_elements_live(&self, query: &str) -> anyhow::Result<String>;
}

/// Second opinion on the page, asked after repeated failures or on request.
#[async_trait]
pub trait DiagnosticAgent: Send + Sync {
    async fn analyze_error(
        &self,
        html: &str,
        live_elements: &str,
        failed_action: &str,
        error: &str,
    ) -> anyhow::Result<String>;

    async fn analyze(&self, html: &str, live_elements: &str, question: &str)
    -> anyhow::Result<String>;
}
