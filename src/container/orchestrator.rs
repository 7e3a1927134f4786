use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use super::log::{LogBuffer, LogLine};
use super::runtime::{BindMount, Connector, CreateRequest};
use super::{ContainerError, ContainerSpec};
use crate::task::{Notices, Status, Task, TaskResult, Tone};

/// Lifecycle step the orchestrator is in. Steps only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    Connecting,
    Pulling,
    Preparing,
    Creating,
    Starting,
    Running,
    Waiting,
    Exited,
    CleaningUp,
    Done,
}

impl Phase {
    /// Log tail is only shown while the container can still produce output.
    fn shows_logs(self) -> bool {
        self < Phase::Exited
    }
}

#[derive(Debug)]
struct RunState {
    phase: Phase,
    text: String,
    started_at: Option<Instant>,
}

/// Runs one container to completion and reports progress as a [`Task`].
pub struct ContainerTask {
    spec: ContainerSpec,
    connector: Box<dyn Connector>,
    base_dir: Option<PathBuf>,
    state: Mutex<RunState>,
    log: LogBuffer,
    notices: Notices,
}

impl ContainerTask {
    pub fn new(spec: ContainerSpec, connector: impl Connector + 'static) -> Self {
        let text = format!("waiting to {} {}", spec.names.before, spec.names.suffix);
        Self {
            spec,
            connector: Box::new(connector),
            base_dir: None,
            state: Mutex::new(RunState {
                phase: Phase::Idle,
                text,
                started_at: None,
            }),
            log: LogBuffer::default(),
            notices: Notices::default(),
        }
    }

    /// Resolve relative volume sources against `dir` instead of the
    /// process working directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().map(|s| s.phase).unwrap_or(Phase::Idle)
    }

    /// The most recent container output, kept after the run for inspection.
    pub fn recent_logs(&self) -> Vec<LogLine> {
        self.log.snapshot()
    }

    /// Move to `phase`, restarting the phase clock when the text changes.
    fn enter(&self, phase: Phase, text: impl Into<String>) {
        let text = text.into();
        if let Ok(mut state) = self.state.lock() {
            debug_assert!(phase >= state.phase, "{:?} -> {phase:?}", state.phase);
            if state.text != text || state.started_at.is_none() {
                state.started_at = Some(Instant::now());
            }
            state.phase = phase;
            state.text = text;
            info!(?phase, status = %state.text, "container phase");
        }
    }

    fn label(&self, prefix: &str) -> String {
        format!("{prefix} {}", self.spec.names.suffix)
    }

    fn orchestrate(&self) -> Result<TaskResult, ContainerError> {
        let names = &self.spec.names;

        self.enter(Phase::Connecting, "connecting to container runtime");
        let runtime = self.connector.connect().map_err(ContainerError::Connect)?;

        self.enter(
            Phase::Pulling,
            format!(
                "pulling image {} to run {}",
                self.spec.image,
                self.label(&names.before)
            ),
        );
        runtime
            .pull_image(&self.spec.image)
            .map_err(|source| ContainerError::Pull {
                image: self.spec.image.clone(),
                source,
            })?;

        let booting = format!("booting container to {}", self.label(&names.before));
        self.enter(Phase::Preparing, booting.clone());
        let mounts = self.resolve_mounts()?;

        self.enter(Phase::Creating, booting.clone());
        let request = CreateRequest {
            image: self.spec.image.clone(),
            entrypoint: self.spec.entrypoint.clone(),
            command: self.spec.command.clone(),
            user: self.spec.user.clone(),
            mounts,
        };
        let created = runtime
            .create_container(&request)
            .map_err(ContainerError::Create)?;
        debug!(id = %created.id, "container created");
        for warning in created.warnings {
            warn!(id = %created.id, %warning, "runtime warning");
            self.notices.push(warning);
        }

        self.enter(Phase::Starting, booting);
        runtime
            .start_container(&created.id)
            .map_err(ContainerError::Start)?;

        self.enter(Phase::Running, self.label(&names.during));
        runtime
            .attach(&created.id, self.log.stdout(), self.log.stderr())
            .map_err(ContainerError::Attach)?;

        self.enter(Phase::Waiting, self.label(&names.during));
        let code = runtime
            .wait_container(&created.id)
            .map_err(ContainerError::Wait)?;
        info!(id = %created.id, code, "container exited");

        self.enter(Phase::Exited, self.label(&names.during));
        if code != 0 {
            // The stopped container is left behind for inspection.
            return Err(ContainerError::Exited {
                label: self.label(&names.before),
                code,
            });
        }

        self.enter(Phase::CleaningUp, self.label(&names.during));
        runtime
            .remove_container(&created.id)
            .map_err(ContainerError::Cleanup)?;

        let done = self.label(&names.after);
        self.enter(Phase::Done, done.clone());
        Ok(TaskResult::success(done))
    }

    fn resolve_mounts(&self) -> Result<Vec<BindMount>, ContainerError> {
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| {
                ContainerError::InvalidMount(format!("cannot determine working directory: {e}"))
            })?,
        };
        self.spec
            .volumes
            .iter()
            .map(|volume| BindMount::resolve(volume, &base))
            .collect()
    }
}

impl Task for ContainerTask {
    fn status(&self) -> Status {
        let Ok(state) = self.state.lock() else {
            return Status::default();
        };
        let Some(started_at) = state.started_at else {
            return Status::new(state.text.clone());
        };
        if !state.phase.shows_logs() {
            return Status::new(state.text.clone());
        }

        let mut status = Status::new(format!(
            "{} ({})",
            state.text,
            format_elapsed(started_at.elapsed())
        ));
        drop(state);

        status.push("container logs:", Tone::Normal);
        for line in self.log.snapshot() {
            let tone = if line.stderr { Tone::Stderr } else { Tone::Normal };
            status.push(line.text, tone);
        }
        status
    }

    fn run(&self) -> Result<TaskResult> {
        Ok(self.orchestrate()?)
    }

    fn drain_notices(&self) -> Vec<String> {
        self.notices.drain()
    }
}

/// Whole seconds, e.g. `5s`, `1m5s`, `1h2m3s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
