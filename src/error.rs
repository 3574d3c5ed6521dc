//! Error taxonomy for the action loop.
//!
//! `BrowserError` covers everything that can go wrong while executing one intent
//! against the live page. Those never escape the executor: they are folded into a
//! negative `ActionResult`. `AgentError` covers task-level failures that end the
//! current task.

use thiserror::Error;

use crate::security::RiskLevel;
use crate::types::TaskStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrowserError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element not visible: {0}")]
    ElementNotVisible(String),

    #[error("element not clickable: {0}")]
    ClickFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    /// Soft: the page may still be interactive.
    #[error("page load timeout: {0}")]
    PageLoadTimeout(String),

    /// Soft: post-action settling did not finish in time.
    #[error("stability timeout: {0}")]
    StabilityTimeout(String),

    #[error("tab operation failed: {0}")]
    Tab(String),

    #[error("in-page script failed: {0}")]
    Script(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// Timeouts that are logged and otherwise ignored.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            BrowserError::PageLoadTimeout(_) | BrowserError::StabilityTimeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("unknown intent: {0}")]
    UnknownIntent(String),

    #[error("blocked: {reason} ({level})")]
    SecurityBlocked { level: RiskLevel, reason: String },

    #[error("action rejected by user")]
    UserRejected,

    #[error("decision source failed: {0:#}")]
    DecisionSource(#[source] anyhow::Error),

    #[error("page snapshot failed: {0:#}")]
    Snapshot(#[source] anyhow::Error),

    #[error("task state conflict: cannot {action} a {from} task")]
    StateConflict {
        from: TaskStatus,
        action: &'static str,
    },

    #[error("task cancelled")]
    Cancelled,
}

/// A task-fatal error tagged with the step at which it happened.
#[derive(Debug, Error)]
#[error("step {step}: {error}")]
pub struct StepFailure {
    pub step: usize,
    #[source]
    pub error: AgentError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_timeouts_are_distinguished() {
        assert!(BrowserError::PageLoadTimeout("x".into()).is_soft());
        assert!(BrowserError::StabilityTimeout("x".into()).is_soft());
        assert!(!BrowserError::ElementNotFound("#a".into()).is_soft());
        assert!(!BrowserError::NavigationFailed("x".into()).is_soft());
    }

    #[test]
    fn step_failure_carries_step_number() {
        let failure = StepFailure {
            step: 3,
            error: AgentError::SecurityBlocked {
                level: RiskLevel::Critical,
                reason: "attempting to delete account".into(),
            },
        };
        assert_eq!(
            failure.to_string(),
            "step 3: blocked: attempting to delete account (critical)"
        );
    }
}
