//! Security risk gate.
//!
//! Policy:
//! - Safe and Medium run without asking.
//! - Critical is never auto-confirmed. Without a confirmation channel it blocks the
//!   task; with one it asks, unless `ask_on_critical` is off.
//! - High runs with a warning under `auto_confirm`, otherwise asks the channel. With
//!   no channel it becomes a non-fatal notice fed back to the decision source.

mod confirm;
mod rules;

use std::sync::Arc;
use tracing::{info, warn};

pub use confirm::{ConfirmChannel, StaticConfirm, TerminalConfirm};
pub use rules::{Matcher, Risk, RiskLevel, Rule, RuleSet};

use crate::types::{Intent, PageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub auto_confirm: bool,
    pub ask_on_critical: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_confirm: false,
            ask_on_critical: true,
        }
    }
}

/// Outcome of gating one intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow,
    /// Fatal for the task.
    Block(Risk),
    /// The confirmation channel said no.
    Rejected(Risk),
    /// Not executed, but the loop continues.
    Notice(Risk),
}

pub struct SecurityGate {
    config: SecurityConfig,
    rules: RuleSet,
    channel: Option<Arc<dyn ConfirmChannel>>,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig, channel: Option<Arc<dyn ConfirmChannel>>) -> Self {
        Self {
            config,
            rules: RuleSet::default(),
            channel,
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn evaluate(&self, intent: &Intent, page: Option<&PageContext>) -> Risk {
        self.rules.evaluate(intent, page)
    }

    pub fn check(&self, intent: &Intent, page: Option<&PageContext>) -> Verdict {
        if !self.config.enabled {
            return Verdict::Allow;
        }

        let risk = self.evaluate(intent, page);
        match risk.level {
            RiskLevel::Safe | RiskLevel::Medium => {
                if risk.level == RiskLevel::Medium {
                    info!(intent = %intent.describe(), reason = %risk.reason, "medium risk, allowing");
                }
                Verdict::Allow
            }
            RiskLevel::Critical => match &self.channel {
                Some(channel) if self.config.ask_on_critical => {
                    self.ask(channel.as_ref(), intent, risk, Verdict::Block)
                }
                _ => {
                    warn!(intent = %intent.describe(), reason = %risk.reason, "critical risk, blocking");
                    Verdict::Block(risk)
                }
            },
            RiskLevel::High => {
                if self.config.auto_confirm {
                    warn!(intent = %intent.describe(), reason = %risk.reason, "high risk auto-confirmed");
                    return Verdict::Allow;
                }
                match &self.channel {
                    Some(channel) => self.ask(channel.as_ref(), intent, risk, Verdict::Notice),
                    None => {
                        warn!(intent = %intent.describe(), reason = %risk.reason, "high risk, no confirmation channel");
                        Verdict::Notice(risk)
                    }
                }
            }
        }
    }

    /// `on_error` decides what a broken channel means for this level.
    fn ask(
        &self,
        channel: &dyn ConfirmChannel,
        intent: &Intent,
        risk: Risk,
        on_error: fn(Risk) -> Verdict,
    ) -> Verdict {
        match channel.confirm(intent, &risk) {
            Ok(true) => {
                info!(intent = %intent.describe(), level = %risk.level, "confirmed by user");
                Verdict::Allow
            }
            Ok(false) => {
                info!(intent = %intent.describe(), level = %risk.level, "rejected by user");
                Verdict::Rejected(risk)
            }
            Err(e) => {
                warn!(error = %e, "confirmation channel failed");
                on_error(risk)
            }
        }
    }
}
