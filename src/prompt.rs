//! Interactive input source.
//!
//! Every question the orchestrator asks goes through [`Prompter`], so the
//! credential and confirmation flows can be driven by [`ScriptedPrompter`] in
//! tests and by [`DefaultsPrompter`] in unattended runs.

use std::cell::RefCell;
use std::collections::VecDeque;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};

/// Prompt failures.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// The terminal could not be read or written.
    #[error("terminal input failed: {0}")]
    Terminal(String),

    /// The input source has no answer for this question.
    #[error("no answer available for \"{prompt}\"")]
    NoAnswer { prompt: String },
}

impl From<dialoguer::Error> for PromptError {
    fn from(err: dialoguer::Error) -> Self {
        Self::Terminal(err.to_string())
    }
}

/// Source of answers to interactive questions. Blocks without timeout.
pub trait Prompter {
    /// Yes/no question.
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, PromptError>;

    /// Free-text answer; may be empty.
    fn input(&self, prompt: &str) -> Result<String, PromptError>;

    /// Hidden free-text answer; may be empty.
    fn secret(&self, prompt: &str) -> Result<String, PromptError>;

    /// Index into `items`.
    fn select(&self, prompt: &str, items: &[&str], default: usize) -> Result<usize, PromptError>;
}

/// Prompter backed by the controlling terminal.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, PromptError> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn input(&self, prompt: &str) -> Result<String, PromptError> {
        Ok(Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?)
    }

    fn secret(&self, prompt: &str) -> Result<String, PromptError> {
        Ok(Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()?)
    }

    fn select(&self, prompt: &str, items: &[&str], default: usize) -> Result<usize, PromptError> {
        Ok(Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()?)
    }
}

/// Unattended prompter: confirmations and selections take their default,
/// free-text questions have no answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultsPrompter;

impl Prompter for DefaultsPrompter {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, PromptError> {
        tracing::info!(prompt, answer = default, "unattended confirmation");
        Ok(default)
    }

    fn input(&self, prompt: &str) -> Result<String, PromptError> {
        Err(PromptError::NoAnswer {
            prompt: prompt.to_owned(),
        })
    }

    fn secret(&self, prompt: &str) -> Result<String, PromptError> {
        Err(PromptError::NoAnswer {
            prompt: prompt.to_owned(),
        })
    }

    fn select(&self, _prompt: &str, _items: &[&str], default: usize) -> Result<usize, PromptError> {
        Ok(default)
    }
}

/// One scripted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Confirm(bool),
    Text(String),
    Select(usize),
}

/// Prompter that replays a fixed queue of answers and records each question.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<Answer>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().collect()),
            asked: RefCell::new(Vec::new()),
        }
    }

    /// Questions asked so far, in order.
    #[must_use]
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }

    /// Answers not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.answers.borrow().len()
    }

    fn next(&self, prompt: &str) -> Result<Answer, PromptError> {
        self.asked.borrow_mut().push(prompt.to_owned());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| PromptError::NoAnswer {
                prompt: prompt.to_owned(),
            })
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool, PromptError> {
        match self.next(prompt)? {
            Answer::Confirm(value) => Ok(value),
            _ => Err(PromptError::NoAnswer {
                prompt: prompt.to_owned(),
            }),
        }
    }

    fn input(&self, prompt: &str) -> Result<String, PromptError> {
        match self.next(prompt)? {
            Answer::Text(value) => Ok(value),
            _ => Err(PromptError::NoAnswer {
                prompt: prompt.to_owned(),
            }),
        }
    }

    fn secret(&self, prompt: &str) -> Result<String, PromptError> {
        self.input(prompt)
    }

    fn select(&self, prompt: &str, items: &[&str], _default: usize) -> Result<usize, PromptError> {
        match self.next(prompt)? {
            Answer::Select(index) if index < items.len() => Ok(index),
            _ => Err(PromptError::NoAnswer {
                prompt: prompt.to_owned(),
            }),
        }
    }
}
