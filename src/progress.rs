//! Progress reporting for pipeline steps.
//!
//! Purely cosmetic: reporters receive start/stop events and never influence
//! control flow.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Receives step start/stop events.
pub trait Progress: Send + Sync {
    fn start(&self, label: &str);

    /// Begin a step whose child output goes straight to the terminal.
    /// Nothing is animated until the step stops.
    fn start_streaming(&self, label: &str) {
        self.start(label)
    }

    fn stop(&self, succeeded: bool);
}

impl<P: Progress + ?Sized> Progress for &P {
    fn start(&self, label: &str) {
        (**self).start(label)
    }

    fn start_streaming(&self, label: &str) {
        (**self).start_streaming(label)
    }

    fn stop(&self, succeeded: bool) {
        (**self).stop(succeeded)
    }
}

/// Terminal spinner, one line per step.
///
/// indicatif hides the spinner itself when stderr is not a terminal; the
/// final ✓/✗ line is always printed to stdout.
#[derive(Default)]
pub struct Spinner {
    active: Mutex<Option<(ProgressBar, String)>>,
}

impl Spinner {
    pub fn new() -> Self {
        Self::default()
    }

    fn activate(&self, pb: ProgressBar, label: &str) {
        if let Ok(mut active) = self.active.lock() {
            if let Some((previous, _)) = active.replace((pb, label.to_string())) {
                previous.finish_and_clear();
            }
        }
    }
}

impl Progress for Spinner {
    fn start(&self, label: &str) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
            .template(" {spinner} {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        self.activate(pb, label);
    }

    fn start_streaming(&self, label: &str) {
        self.activate(ProgressBar::hidden(), label);
    }

    fn stop(&self, succeeded: bool) {
        let Some((pb, label)) = self.active.lock().ok().and_then(|mut a| a.take()) else {
            return;
        };
        pb.finish_and_clear();
        if succeeded {
            println!(" \x1b[32m✓\x1b[0m {}", label);
        } else {
            println!(" \x1b[31m✗\x1b[0m {}", label);
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some((pb, _)) = active.take() {
                pb.finish_and_clear();
            }
        }
    }
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Progress for Silent {
    fn start(&self, _label: &str) {}
    fn stop(&self, _succeeded: bool) {}
}
