//! Risk rule set.
//!
//! Each rule is an independent predicate over the intent and, when available, the
//! current page. Evaluation takes the highest level across every matching rule;
//! on a tie the first rule seen at that level wins. Rules that need page context
//! simply do not match when it is absent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Intent, PageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub level: RiskLevel,
    pub reason: String,
    pub suggestions: Vec<String>,
}

impl Risk {
    pub fn safe() -> Self {
        Self {
            level: RiskLevel::Safe,
            reason: String::new(),
            suggestions: Vec::new(),
        }
    }
}

pub type Matcher = fn(&Intent, Option<&PageContext>) -> bool;

#[derive(Clone)]
pub struct Rule {
    pub name: &'static str,
    pub level: RiskLevel,
    pub reason: &'static str,
    pub suggestions: &'static [&'static str],
    pub matcher: Matcher,
}

impl Rule {
    pub fn matches(&self, intent: &Intent, page: Option<&PageContext>) -> bool {
        (self.matcher)(intent, page)
    }

    fn to_risk(&self) -> Risk {
        Risk {
            level: self.level,
            reason: self.reason.to_string(),
            suggestions: self.suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        let mut rules = critical_rules();
        rules.extend(high_rules());
        rules.extend(medium_rules());
        Self { rules }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn evaluate(&self, intent: &Intent, page: Option<&PageContext>) -> Risk {
        let mut best: Option<&Rule> = None;
        for rule in self.rules.iter().filter(|r| r.matches(intent, page)) {
            if best.is_none_or(|b| rule.level > b.level) {
                best = Some(rule);
            }
        }
        best.map(Rule::to_risk).unwrap_or_else(Risk::safe)
    }
}

pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn page_url(page: Option<&PageContext>) -> Option<String> {
    page.map(|p| p.url.to_lowercase())
}

fn critical_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "delete_account",
            level: RiskLevel::Critical,
            reason: "attempting to delete account",
            suggestions: &[
                "This action cannot be undone",
                "All data will be permanently lost",
            ],
            matcher: |intent, _| {
                if !matches!(intent, Intent::Click { .. }) {
                    return false;
                }
                let text = intent.match_text();
                contains_any(
                    &text,
                    &[
                        "delete account",
                        "delete my account",
                        "close account",
                        "close my account",
                        "deactivate account",
                        "remove account",
                        "permanently delete",
                    ],
                ) || (text.contains("account")
                    && contains_any(&text, &["delete", "deactivate", "terminate"]))
            },
        },
        Rule {
            name: "financial_transaction",
            level: RiskLevel::Critical,
            reason: "attempting financial transaction",
            suggestions: &[
                "This may involve real money",
                "Verify payment details carefully",
            ],
            matcher: |intent, page| {
                let Some(url) = page_url(page) else {
                    return false;
                };
                intent.is_click()
                    && contains_any(&url, &["payment", "checkout", "billing"])
                    && contains_any(
                        &intent.match_text(),
                        &[
                            "pay",
                            "purchase",
                            "buy",
                            "confirm payment",
                            "place order",
                            "complete order",
                        ],
                    )
            },
        },
    ]
}

fn high_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "data_deletion",
            level: RiskLevel::High,
            reason: "deleting data",
            suggestions: &["Data may be permanently lost", "Consider a backup"],
            matcher: |intent, _| {
                intent.is_click()
                    && contains_any(
                        &intent.match_text(),
                        &["delete", "remove", "trash", "clear all", "erase", "permanently"],
                    )
            },
        },
        Rule {
            name: "sensitive_form",
            level: RiskLevel::High,
            reason: "submitting sensitive info",
            suggestions: &["Verify the info is correct", "Check the website is legitimate"],
            matcher: |intent, _| {
                matches!(intent, Intent::Click { .. } | Intent::Type { .. })
                    && contains_any(
                        &intent.match_text(),
                        &[
                            "password",
                            "credit card",
                            "card number",
                            "cvv",
                            "ssn",
                            "social security",
                            "bank account",
                        ],
                    )
            },
        },
        Rule {
            name: "job_application",
            level: RiskLevel::High,
            reason: "sending job application",
            suggestions: &["The application will be sent", "Verify the info is correct"],
            matcher: |intent, page| {
                let Some(url) = page_url(page) else {
                    return false;
                };
                matches!(intent, Intent::Click { .. })
                    && contains_any(
                        &url,
                        &["careers", "jobs", "vacanc", "greenhouse.io", "lever.co", "workday"],
                    )
                    && contains_any(&intent.match_text(), &["apply", "submit", "send application"])
            },
        },
        Rule {
            name: "order_placement",
            level: RiskLevel::High,
            reason: "placing order",
            suggestions: &["The order will be placed", "May involve real money"],
            matcher: |intent, page| {
                let Some(url) = page_url(page) else {
                    return false;
                };
                matches!(intent, Intent::Click { .. })
                    && contains_any(&url, &["cart", "basket", "checkout", "order"])
                    && contains_any(
                        &intent.match_text(),
                        &["place order", "order now", "buy now", "checkout", "pay", "order"],
                    )
            },
        },
    ]
}

fn medium_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "email_send",
            level: RiskLevel::Medium,
            reason: "attempting to send email",
            suggestions: &["The email will be sent to its recipients"],
            matcher: |intent, page| {
                let Some(url) = page_url(page) else {
                    return false;
                };
                matches!(intent, Intent::Click { .. })
                    && url.contains("mail")
                    && intent.match_text().contains("send")
            },
        },
        Rule {
            name: "settings_change",
            level: RiskLevel::Medium,
            reason: "attempting to change settings",
            suggestions: &[],
            matcher: |intent, page| {
                let Some(url) = page_url(page) else {
                    return false;
                };
                matches!(
                    intent,
                    Intent::Click { .. } | Intent::Type { .. } | Intent::PressEnter
                ) && contains_any(&url, &["settings", "preferences", "config"])
            },
        },
    ]
}
