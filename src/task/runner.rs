use std::sync::Arc;
use std::sync::mpsc::{self, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use super::{ResultIcon, Status, Task, TaskResult};

/// Repaint cadence of the presentation loop (one spinner frame).
pub const TICK: Duration = Duration::from_millis(100);

/// Icon printed when a result does not carry one.
pub const NEUTRAL_ICON: &str = " ";

/// Where the Runner paints live status and prints the final line.
pub trait Surface {
    /// Repaint the live region. `frame` advances once per tick.
    fn render(&mut self, frame: usize, status: &Status) -> Result<()>;

    /// Wait up to `timeout` for operator input; `true` means cancel.
    fn poll_cancel(&mut self, timeout: Duration) -> Result<bool>;

    /// Print a non-fatal line above the live region.
    fn notice(&mut self, message: &str) -> Result<()>;

    /// Clear the live region and print the task's one summary line.
    fn finish(&mut self, summary: &Summary) -> Result<()>;
}

/// The single line printed once a task is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    /// A finished task: icon (or [`NEUTRAL_ICON`]) and message.
    Done { icon: Option<ResultIcon>, message: String },
    /// A failed task: the full error chain.
    Failed(String),
    /// The operator stopped waiting; carries the last headline.
    Cancelled(String),
}

impl Summary {
    pub fn is_error(&self) -> bool {
        !matches!(self, Summary::Done { .. })
    }

    pub fn text(&self) -> String {
        match self {
            Summary::Done { icon, message } => {
                let icon = icon.map(ResultIcon::as_str).unwrap_or(NEUTRAL_ICON);
                format!("{icon} {message}")
            }
            Summary::Failed(err) => format!("{}  {err}", ResultIcon::Error.as_str()),
            Summary::Cancelled(headline) => {
                format!("{}  cancelled: {headline}", ResultIcon::Error.as_str())
            }
        }
    }
}

/// Why the pipeline has to stop. The summary line is already printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Halt {
    #[error("task failed")]
    Failed,
    #[error("cancelled by operator")]
    Cancelled,
}

enum Outcome {
    Finished(TaskResult),
    Failed(anyhow::Error),
    Cancelled,
}

/// Runs one task at a time while keeping a surface live.
pub struct Runner<S: Surface> {
    surface: S,
}

impl<S: Surface> Runner<S> {
    pub fn new(surface: S) -> Self {
        Self { surface }
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Execute `task` to completion, or until the operator cancels.
    ///
    /// Cancellation only detaches: the worker thread is left running and its
    /// eventual outcome is discarded. Returning `Err` means the caller must
    /// halt the pipeline and exit non-zero.
    pub fn execute<T: Task + 'static>(&mut self, task: T) -> Result<TaskResult, Halt> {
        let task = Arc::new(task);
        let started = Instant::now();
        info!(status = %task.status().headline, "task started");

        let outcome = match self.drive(&task) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failed(err.context("status display failed")),
        };

        for message in task.drain_notices() {
            let _ = self.surface.notice(&message);
        }

        let (summary, result) = match outcome {
            Outcome::Finished(result) => {
                let message = if result.message.is_empty() {
                    task.status().to_string()
                } else {
                    result.message.clone()
                };
                info!(elapsed = ?started.elapsed(), %message, "task finished");
                let summary = Summary::Done {
                    icon: result.icon,
                    message,
                };
                (summary, Ok(result))
            }
            Outcome::Failed(err) => {
                warn!(elapsed = ?started.elapsed(), error = %format!("{err:#}"), "task failed");
                (Summary::Failed(format!("{err:#}")), Err(Halt::Failed))
            }
            Outcome::Cancelled => {
                let headline = task.status().headline;
                warn!(elapsed = ?started.elapsed(), %headline, "task cancelled");
                (Summary::Cancelled(headline), Err(Halt::Cancelled))
            }
        };

        if let Err(err) = self.surface.finish(&summary) {
            warn!(error = %err, "could not print task summary");
        }
        result
    }

    fn drive<T: Task + 'static>(&mut self, task: &Arc<T>) -> Result<Outcome> {
        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(task);
        std::thread::Builder::new()
            .name("task".into())
            .spawn(move || {
                // Receiver is gone after a cancel; ignore send errors.
                let _ = tx.send(worker.run());
            })?;

        let mut frame = 0usize;
        loop {
            for message in task.drain_notices() {
                self.surface.notice(&message)?;
            }
            self.surface.render(frame, &task.status())?;

            match rx.try_recv() {
                Ok(Ok(result)) => return Ok(Outcome::Finished(result)),
                Ok(Err(err)) => return Ok(Outcome::Failed(err)),
                Err(TryRecvError::Disconnected) => {
                    return Ok(Outcome::Failed(anyhow!(
                        "task worker exited without reporting a result"
                    )));
                }
                Err(TryRecvError::Empty) => {}
            }

            if self.surface.poll_cancel(TICK)? {
                return Ok(Outcome::Cancelled);
            }
            frame = frame.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::task::Notices;

    /// Records everything the Runner asks of it; cancels after `cancel_after` polls.
    #[derive(Default)]
    struct RecordingSurface {
        frames: Vec<String>,
        notices: Vec<String>,
        summaries: Vec<Summary>,
        polls: usize,
        cancel_after: Option<usize>,
    }

    impl Surface for RecordingSurface {
        fn render(&mut self, _frame: usize, status: &Status) -> Result<()> {
            self.frames.push(status.to_string());
            Ok(())
        }

        fn poll_cancel(&mut self, timeout: Duration) -> Result<bool> {
            self.polls += 1;
            if self.cancel_after.is_some_and(|n| self.polls >= n) {
                return Ok(true);
            }
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
            Ok(false)
        }

        fn notice(&mut self, message: &str) -> Result<()> {
            self.notices.push(message.to_string());
            Ok(())
        }

        fn finish(&mut self, summary: &Summary) -> Result<()> {
            self.summaries.push(summary.clone());
            Ok(())
        }
    }

    struct FixedTask {
        runs: Arc<AtomicUsize>,
        outcome: Mutex<Option<Result<TaskResult>>>,
        notices: Notices,
    }

    impl FixedTask {
        fn new(outcome: Result<TaskResult>) -> (Self, Arc<AtomicUsize>) {
            let runs = Arc::new(AtomicUsize::new(0));
            let task = Self {
                runs: Arc::clone(&runs),
                outcome: Mutex::new(Some(outcome)),
                notices: Notices::default(),
            };
            (task, runs)
        }
    }

    impl Task for FixedTask {
        fn status(&self) -> Status {
            Status::new("doing the thing")
        }

        fn run(&self) -> Result<TaskResult> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.notices.push("heads up");
            self.outcome
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(anyhow!("ran twice")))
        }

        fn drain_notices(&self) -> Vec<String> {
            self.notices.drain()
        }
    }

    /// Blocks in `run` until the test drops the sender.
    struct BlockedTask {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Task for BlockedTask {
        fn status(&self) -> Status {
            Status::new("waiting forever")
        }

        fn run(&self) -> Result<TaskResult> {
            let _ = self.release.lock().unwrap().recv();
            Ok(TaskResult::success("should never be printed"))
        }
    }

    #[test]
    fn success_prints_icon_and_message() {
        let (task, runs) = FixedTask::new(Ok(TaskResult::success("downloaded x")));
        let mut runner = Runner::new(RecordingSurface::default());

        let result = runner.execute(task).expect("task should succeed");

        assert_eq!(result.message, "downloaded x");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let surface = runner.surface_mut();
        assert_eq!(surface.summaries.len(), 1);
        assert_eq!(surface.summaries[0].text(), "✅ downloaded x");
        assert!(!surface.frames.is_empty());
        assert_eq!(surface.notices, vec!["heads up"]);
    }

    #[test]
    fn empty_message_falls_back_to_status_and_neutral_icon() {
        let (task, _) = FixedTask::new(Ok(TaskResult::default()));
        let mut runner = Runner::new(RecordingSurface::default());

        runner.execute(task).expect("task should succeed");

        let summary = &runner.surface_mut().summaries[0];
        assert_eq!(summary.text(), "  doing the thing");
        assert!(!summary.is_error());
    }

    #[test]
    fn failure_halts_with_one_error_line() {
        let err = anyhow!("connection refused").context("error pulling image demo:latest");
        let (task, runs) = FixedTask::new(Err(err));
        let mut runner = Runner::new(RecordingSurface::default());

        let halt = runner.execute(task).unwrap_err();

        assert_eq!(halt, Halt::Failed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let summaries = &runner.surface_mut().summaries;
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].text(),
            "⚠️  error pulling image demo:latest: connection refused"
        );
    }

    #[test]
    fn cancel_detaches_without_success_line() {
        let (release, rx) = mpsc::channel::<()>();
        let task = BlockedTask {
            release: Mutex::new(rx),
        };
        let mut runner = Runner::new(RecordingSurface {
            cancel_after: Some(3),
            ..Default::default()
        });

        let halt = runner.execute(task).unwrap_err();

        assert_eq!(halt, Halt::Cancelled);
        let summaries = &runner.surface_mut().summaries;
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0],
            Summary::Cancelled("waiting forever".to_string())
        );
        assert!(summaries[0].is_error());
        drop(release);
    }

    #[test]
    fn panicking_task_is_reported_as_failure() {
        struct Panics;
        impl Task for Panics {
            fn status(&self) -> Status {
                Status::new("about to panic")
            }
            fn run(&self) -> Result<TaskResult> {
                panic!("boom");
            }
        }

        let mut runner = Runner::new(RecordingSurface::default());
        assert_eq!(runner.execute(Panics).unwrap_err(), Halt::Failed);
        assert!(
            runner.surface_mut().summaries[0]
                .text()
                .contains("without reporting a result")
        );
    }
}
