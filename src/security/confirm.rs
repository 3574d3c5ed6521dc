use anyhow::Result;
use std::io::{BufRead, Write};

use super::Risk;
use crate::types::Intent;

/// Asks a human (or a policy) whether a risky intent may run.
///
/// Implementations are called synchronously from the step loop; a terminal prompt
/// blocks the loop until answered.
pub trait ConfirmChannel: Send + Sync {
    fn confirm(&self, intent: &Intent, risk: &Risk) -> Result<bool>;
}

/// y/N prompt on the controlling terminal.
pub struct TerminalConfirm;

impl ConfirmChannel for TerminalConfirm {
    fn confirm(&self, intent: &Intent, risk: &Risk) -> Result<bool> {
        let mut err = std::io::stderr().lock();
        writeln!(err)?;
        writeln!(err, "  !! {} risk: {}", risk.level, risk.reason)?;
        writeln!(err, "     action: {}", intent.describe())?;
        for suggestion in &risk.suggestions {
            writeln!(err, "     - {suggestion}")?;
        }
        write!(err, "  Proceed? [y/N] ")?;
        err.flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

/// Fixed answer; used for headless policies and in tests.
pub struct StaticConfirm(pub bool);

impl ConfirmChannel for StaticConfirm {
    fn confirm(&self, _intent: &Intent, _risk: &Risk) -> Result<bool> {
        Ok(self.0)
    }
}
