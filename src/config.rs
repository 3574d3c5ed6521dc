//! Runtime configuration.
//!
//! Built once at startup (environment plus CLI overrides) and handed to the
//! components that need it. Nothing reads the environment after that.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::security::SecurityConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Per-operation budgets. `navigation`, `element` and `visible` are hard; the
/// stability ones are soft and only logged when exceeded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub navigation: Duration,
    pub element: Duration,
    pub visible: Duration,
    /// Retry budget for the later click strategies.
    pub retry_locate: Duration,
    pub settle: Duration,
    pub stability: Duration,
    pub short_stability: Duration,
    pub quiet_period: Duration,
    pub scroll_settle: Duration,
    pub pointer_pause: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            element: Duration::from_secs(10),
            visible: Duration::from_secs(5),
            retry_locate: Duration::from_secs(2),
            settle: Duration::from_millis(100),
            stability: Duration::from_secs(5),
            short_stability: Duration::from_secs(2),
            quiet_period: Duration::from_millis(300),
            scroll_settle: Duration::from_millis(300),
            pointer_pause: Duration::from_millis(100),
        }
    }
}

impl Timeouts {
    /// Zeroed settle delays and tight budgets, for fake backends.
    pub fn instant() -> Self {
        Self {
            navigation: Duration::from_millis(200),
            element: Duration::from_millis(200),
            visible: Duration::from_millis(100),
            retry_locate: Duration::from_millis(50),
            settle: Duration::ZERO,
            stability: Duration::from_millis(100),
            short_stability: Duration::from_millis(50),
            quiet_period: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            pointer_pause: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserConfig {
    pub headless: bool,
    pub attach_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub user_data_dir: PathBuf,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub failure_threshold: u32,
    pub negative_guard_steps: usize,
    pub negative_phrases: Vec<String>,
    pub screenshots_dir: PathBuf,
    pub diagnostic_timeout: Duration,
}

pub const DEFAULT_NEGATIVE_PHRASES: &[&str] = &[
    "could not",
    "couldn't",
    "unable to",
    "failed to",
    "sorry",
    "unfortunately",
    "impossible",
    "partially",
    "not completed",
    "not finished",
    "did not work",
];

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            negative_guard_steps: 20,
            negative_phrases: DEFAULT_NEGATIVE_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            screenshots_dir: PathBuf::from("screenshots"),
            diagnostic_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub browser: BrowserConfig,
    pub agent: AgentConfig,
    pub security: SecurityConfig,
    pub llm: LlmConfig,
    pub logging: LogConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let mut timeouts = Timeouts::default();
        timeouts.navigation = Duration::from_secs(env.parse("BROWSER_TIMEOUT", 30u64)?);
        timeouts.element = Duration::from_secs(env.parse("BROWSER_ELEMENT_TIMEOUT", 10u64)?);

        let browser = BrowserConfig {
            headless: env.flag("BROWSER_HEADLESS", false)?,
            attach_url: env.get("BROWSER_ATTACH_URL"),
            chrome_path: env.get("BROWSER_PATH").map(PathBuf::from),
            user_data_dir: env
                .get("BROWSER_USER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_profile_dir),
            timeouts,
        };

        let defaults = AgentConfig::default();
        let mut negative_phrases = defaults.negative_phrases;
        if let Some(extra) = env.get("AGENT_NEGATIVE_PHRASES") {
            negative_phrases.extend(
                extra
                    .split(',')
                    .map(|p| p.trim().to_lowercase())
                    .filter(|p| !p.is_empty()),
            );
        }
        let agent = AgentConfig {
            failure_threshold: env.parse("AGENT_FAILURE_THRESHOLD", defaults.failure_threshold)?,
            negative_guard_steps: env
                .parse("AGENT_NEGATIVE_GUARD_STEPS", defaults.negative_guard_steps)?,
            negative_phrases,
            screenshots_dir: env
                .get("AGENT_SCREENSHOTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.screenshots_dir),
            diagnostic_timeout: Duration::from_secs(env.parse("AGENT_DIAGNOSTIC_TIMEOUT", 60u64)?),
        };
        if agent.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "AGENT_FAILURE_THRESHOLD",
                value: "0".to_string(),
            });
        }

        let security = SecurityConfig {
            enabled: env.flag("SECURITY_ENABLED", true)?,
            auto_confirm: env.flag("SECURITY_AUTO_CONFIRM", false)?,
            ask_on_critical: env.flag("SECURITY_ASK_ON_CRITICAL", true)?,
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_key: env.get("ANTHROPIC_API_KEY"),
            base_url: env.get("ANTHROPIC_BASE_URL").unwrap_or(llm_defaults.base_url),
            model: env.get("ANTHROPIC_MODEL").unwrap_or(llm_defaults.model),
            max_tokens: env.parse("ANTHROPIC_MAX_TOKENS", llm_defaults.max_tokens)?,
            temperature: env.parse("ANTHROPIC_TEMPERATURE", llm_defaults.temperature)?,
        };

        let logging = LogConfig {
            level: env.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            json: env.flag("LOG_AS_JSON", false)?,
            file: env.get("LOG_FILE").map(PathBuf::from),
        };

        Ok(Self {
            browser,
            agent,
            security,
            llm,
            logging,
        })
    }
}

fn default_profile_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("agentic-browser").join("profile"))
        .unwrap_or_else(|| PathBuf::from(".browser-data"))
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Empty values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = config(&[]).unwrap();
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.browser.timeouts.navigation, Duration::from_secs(30));
        assert!(cfg.security.enabled);
        assert!(!cfg.security.auto_confirm);
        assert!(cfg.security.ask_on_critical);
        assert_eq!(cfg.agent.failure_threshold, 2);
        assert_eq!(cfg.agent.negative_guard_steps, 20);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.llm.api_key.is_none());
    }

    #[test]
    fn named_knobs_are_read() {
        let cfg = config(&[
            ("BROWSER_HEADLESS", "true"),
            ("BROWSER_TIMEOUT", "45"),
            ("SECURITY_ENABLED", "false"),
            ("SECURITY_AUTO_CONFIRM", "1"),
            ("AGENT_NEGATIVE_PHRASES", "Gave Up, ,no luck"),
            ("LOG_AS_JSON", "true"),
        ])
        .unwrap();
        assert!(cfg.browser.headless);
        assert_eq!(cfg.browser.timeouts.navigation, Duration::from_secs(45));
        assert!(!cfg.security.enabled);
        assert!(cfg.security.auto_confirm);
        assert!(cfg.agent.negative_phrases.contains(&"gave up".to_string()));
        assert!(cfg.agent.negative_phrases.contains(&"no luck".to_string()));
        assert!(cfg.logging.json);
    }

    #[test]
    fn invalid_values_name_the_key() {
        assert_eq!(
            config(&[("BROWSER_TIMEOUT", "soon")]).unwrap_err(),
            ConfigError::Invalid {
                key: "BROWSER_TIMEOUT",
                value: "soon".to_string()
            }
        );
        assert!(config(&[("BROWSER_HEADLESS", "maybe")]).is_err());
        assert!(config(&[("AGENT_FAILURE_THRESHOLD", "0")]).is_err());
    }
}
