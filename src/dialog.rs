//! Interactive prompts.
//!
//! Every question `iotflash` asks goes through the [`Dialog`] trait so the
//! workflow can run against a terminal ([`TermDialog`]) or against scripted
//! answers in tests.

use std::io;

use console::Term;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};

use crate::error::{Error, Result};

pub trait Dialog {
    /// Ask a yes/no question.
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;

    /// Ask the operator to pick one of `items`, returning its index.
    /// Cancelling the selection is reported as [`Error::Declined`].
    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize>;

    /// Ask for a line of text.
    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String>;

    /// Ask for a secret; the answer is never echoed and is kept as bytes.
    fn password(&mut self, prompt: &str) -> Result<Vec<u8>>;
}

/// Asks questions on the terminal with `dialoguer`.
pub struct TermDialog {
    theme: ColorfulTheme,
}

impl Default for TermDialog {
    fn default() -> Self {
        TermDialog {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Dialog for TermDialog {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize> {
        let selection = Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact_on_opt(&Term::stderr())?;
        selection.ok_or(Error::Declined)
    }

    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::with_theme(&self.theme);
        input.with_prompt(prompt);
        if let Some(default) = default {
            input.default(default.to_owned());
        }
        Ok(input.interact_text()?.trim().to_owned())
    }

    fn password(&mut self, prompt: &str) -> Result<Vec<u8>> {
        let answer: io::Result<String> = Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .interact();
        Ok(answer?.into_bytes())
    }
}
