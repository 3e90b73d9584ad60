//! Prompt validation before anything is sent.

use std::collections::HashSet;

use super::types::BotError;

/// Checks a prompt before an imagine request is issued.
pub trait PromptValidator: Send + Sync {
    fn validate(&self, prompt: &str) -> Result<(), BotError>;
}

/// Rejects empty prompts and prompts containing a banned word.
///
/// Words are compared lower-cased after splitting on whitespace and
/// punctuation.
#[derive(Debug, Clone, Default)]
pub struct BannedWordValidator {
    banned: HashSet<String>,
}

impl BannedWordValidator {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            banned: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.banned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.is_empty()
    }
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || ",.!?;:-_()[]{}\"'/\\|@#$%^&*+=<>~`".contains(c)
}

impl PromptValidator for BannedWordValidator {
    fn validate(&self, prompt: &str) -> Result<(), BotError> {
        if prompt.trim().is_empty() {
            return Err(BotError::validation("prompt is empty"));
        }
        let lowered = prompt.to_lowercase();
        if let Some(word) = lowered
            .split(is_separator)
            .find(|w| !w.is_empty() && self.banned.contains(*w))
        {
            return Err(BotError::validation(format!("word {:?} is banned", word)));
        }
        Ok(())
    }
}
