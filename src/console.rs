//! Terminal interaction: spinners and confirmations that do not trample each other.

use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::orchestrator::Prompter;

/// Owns the spinner currently on screen, if any.
#[derive(Default)]
pub struct Console {
    active: Mutex<Option<ProgressBar>>,
}

impl Console {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spinner(&self, message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut active) = self.active.lock() {
            *active = Some(pb.clone());
        }
        pb
    }

    pub fn finish(&self, pb: &ProgressBar, message: String) {
        pb.finish_with_message(message);
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
    }

    /// Runs `f` with the spinner hidden.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        let active = self.active.lock().ok().and_then(|a| a.clone());
        match active {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }
}

/// Confirmations through dialoguer; `--yes` answers every question with yes.
pub struct DialoguerPrompter {
    console: Arc<Console>,
    assume_yes: bool,
}

impl DialoguerPrompter {
    pub fn new(console: Arc<Console>, assume_yes: bool) -> Self {
        Self {
            console,
            assume_yes,
        }
    }
}

impl Prompter for DialoguerPrompter {
    fn confirm(&self, question: &str, default: bool) -> bool {
        if self.assume_yes {
            tracing::debug!(question, "Assuming yes");
            return true;
        }
        self.console.suspend(|| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(question)
                .default(default)
                .interact()
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assume_yes_never_prompts() {
        let prompter = DialoguerPrompter::new(Console::new(), true);
        assert!(prompter.confirm("Uninstall AnyTLS?", false));
    }

    #[test]
    fn suspend_without_spinner_runs_inline() {
        let console = Console::new();
        assert_eq!(console.suspend(|| 7), 7);
        let pb = console.spinner("working");
        assert_eq!(console.suspend(|| 8), 8);
        console.finish(&pb, "done".into());
        assert!(console.active.lock().unwrap().is_none());
    }
}
