use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};

/// Cooperative cancellation, checked between items only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancels on the first call. Returns false if the flag was already set,
    /// i.e. the user interrupted twice.
    pub fn interrupt(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Routes Ctrl-C to this flag. The current item finishes and the pass
    /// stops; a second Ctrl-C exits immediately.
    pub fn cancel_on_interrupt(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if flag.interrupt() {
                warn!("Interrupted, stopping after the current item (Ctrl-C again to abort)");
            } else {
                std::process::exit(130);
            }
        })
        .map_err(|e| PipelineError::Configuration(format!("cannot install Ctrl-C handler: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Done,
    Skipped,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: Vec<(String, PipelineError)>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.skipped + self.failed.len()
    }
}

/// Drives one stage over an ordered list of work items.
///
/// Recoverable errors are logged against their item and the loop moves on;
/// a fatal error stops the pass and is returned.
pub struct BatchRunner {
    cancel: CancelFlag,
    show_progress: bool,
}

impl BatchRunner {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn run<T, L, F>(&self, stage: &str, items: &[T], label: L, mut work: F) -> Result<BatchOutcome>
    where
        L: Fn(&T) -> String,
        F: FnMut(&T) -> Result<ItemStatus>,
    {
        let progress = self.progress_bar(stage, items.len());
        let mut outcome = BatchOutcome::default();
        info!("{}: {} items", stage, items.len());

        for item in items {
            if self.cancel.is_cancelled() {
                warn!("{}: cancelled after {} items", stage, outcome.attempted());
                outcome.cancelled = true;
                break;
            }

            let name = label(item);
            progress.set_message(name.clone());
            match work(item) {
                Ok(ItemStatus::Done) => outcome.succeeded += 1,
                Ok(ItemStatus::Skipped) => outcome.skipped += 1,
                Err(e) if e.is_fatal() => {
                    progress.abandon_with_message(format!("aborted at {}", name));
                    error!("{}: fatal error at {}: {}", stage, name, e);
                    return Err(e);
                }
                Err(e) => {
                    error!("{}: {} failed: {}", stage, name, e);
                    outcome.failed.push((name, e));
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        info!(
            "{}: {} done, {} skipped, {} failed{}",
            stage,
            outcome.succeeded,
            outcome.skipped,
            outcome.failed.len(),
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        Ok(outcome)
    }

    fn progress_bar(&self, stage: &str, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{prefix} [{bar:40}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(stage.to_string());
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<String> {
        vec!["A".into(), "B".into(), "C".into()]
    }

    #[test]
    fn failure_of_one_item_does_not_stop_the_rest() {
        let runner = BatchRunner::new(CancelFlag::new());
        let mut committed = Vec::new();

        let outcome = runner
            .run("test", &ids(), |s| s.clone(), |id| {
                if id == "B" {
                    return Err(PipelineError::Download {
                        video_id: id.clone(),
                        message: "unavailable".into(),
                    });
                }
                committed.push(id.clone());
                Ok(ItemStatus::Done)
            })
            .unwrap();

        assert_eq!(committed, vec!["A", "C"]);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "B");
    }

    #[test]
    fn fatal_error_aborts_the_pass() {
        let runner = BatchRunner::new(CancelFlag::new());
        let mut seen = Vec::new();

        let err = runner
            .run("test", &ids(), |s| s.clone(), |id| {
                seen.push(id.clone());
                if id == "B" {
                    return Err(PipelineError::ModelLoad {
                        path: "m.onnx".into(),
                        message: "gone".into(),
                    });
                }
                Ok(ItemStatus::Done)
            })
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(seen, vec!["A", "B"]);
    }

    #[test]
    fn cancellation_is_checked_between_items() {
        let cancel = CancelFlag::new();
        let runner = BatchRunner::new(cancel.clone());
        let mut seen = Vec::new();

        let outcome = runner
            .run("test", &ids(), |s| s.clone(), |id| {
                seen.push(id.clone());
                if id == "A" {
                    cancel.cancel();
                }
                Ok(ItemStatus::Skipped)
            })
            .unwrap();

        assert_eq!(seen, vec!["A"]);
        assert!(outcome.cancelled);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn second_interrupt_is_reported() {
        let cancel = CancelFlag::new();
        let handler_side = cancel.clone();

        assert!(handler_side.interrupt());
        assert!(cancel.is_cancelled());
        assert!(!handler_side.interrupt());
    }
}
