//! Autonomous browser agent.
//!
//! A step loop asks a decision source for one intent at a time, runs it past the
//! security gate, executes it against the live browser and feeds the outcome back.

pub mod agent;
pub mod browser;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod security;
pub mod types;

pub use config::Config;
pub use error::{AgentError, BrowserError, StepFailure};
pub use types::{ActionResult, Decision, Intent, PageContext, Task, TaskStatus};
