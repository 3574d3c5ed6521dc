/// Refuses early completions whose result text admits defeat.
///
/// Below `max_step` a completion like "Sorry, I could not find it" is sent back
/// to the decision source instead of ending the task.
#[derive(Debug, Clone, PartialEq)]
pub struct NegativeGuard {
    phrases: Vec<String>,
    max_step: usize,
}

impl NegativeGuard {
    pub fn new<I, S>(phrases: I, max_step: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            max_step,
        }
    }

    /// First failure phrase contained in `text`, case-insensitively.
    pub fn matched(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.phrases
            .iter()
            .find(|p| text.contains(p.as_str()))
            .map(String::as_str)
    }

    /// The phrase that makes this completion premature, if it is one.
    pub fn rejects(&self, step: usize, text: &str) -> Option<&str> {
        if step >= self.max_step {
            return None;
        }
        self.matched(text)
    }

    pub fn corrective(phrase: &str) -> String {
        format!(
            "Completion rejected: the result says \"{phrase}\", so the task is not done yet. \
             Do not give up. Try a different approach: another selector, scrolling, \
             query_dom to list clickable elements, or analyze_page. \
             Call complete_task only once the task has actually been accomplished."
        )
    }
}
