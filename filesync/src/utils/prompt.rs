//! Operator interaction: masked secret input and yes/no confirmation.

use super::errors::{Result, SyncError};
use dialoguer::{Confirm, Password};

/// Blocking prompts shown to the operator.
pub trait Prompter: Send + Sync {
    /// Read a secret without echoing it.
    fn secret(&self, prompt: &str) -> Result<String>;

    /// Ask a yes/no question; anything but an explicit yes is a refusal.
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Prompter backed by the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn secret(&self, prompt: &str) -> Result<String> {
        Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(|e| SyncError::Prompt(e.to_string()))
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| SyncError::Prompt(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every confirmation with a fixed value and counts how often it was asked.
    pub struct ScriptedPrompter {
        pub answer: bool,
        pub asked: AtomicUsize,
    }

    impl ScriptedPrompter {
        pub fn new(answer: bool) -> Self {
            Self {
                answer,
                asked: AtomicUsize::new(0),
            }
        }

        pub fn times_asked(&self) -> usize {
            self.asked.load(Ordering::SeqCst)
        }
    }

    impl Prompter for ScriptedPrompter {
        fn secret(&self, _prompt: &str) -> Result<String> {
            Ok("secret".to_string())
        }

        fn confirm(&self, _prompt: &str) -> Result<bool> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }
}
