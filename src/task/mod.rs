// Task abstraction: pollable status plus a one-shot blocking run.

pub mod runner;

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::container::ContainerTask;
use crate::steps::{DownloadTask, ExtractTask, FeedDiscoveryTask};

pub use runner::{Halt, Runner, Summary, Surface, TICK};

/// A single unit of long-running work.
///
/// `run` is invoked exactly once, on a background thread. `status` is polled
/// from the presentation loop while `run` is in progress, so it must be cheap
/// and must never block on the work itself.
pub trait Task: Send + Sync {
    /// Current human-readable description of the work.
    fn status(&self) -> Status;

    /// Perform the work. Called once.
    fn run(&self) -> Result<TaskResult>;

    /// Non-fatal messages raised since the last call, oldest first.
    fn drain_notices(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultIcon {
    Success,
    Error,
    Unchanged,
}

impl ResultIcon {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultIcon::Success => "✅",
            ResultIcon::Error => "⚠️",
            ResultIcon::Unchanged => "☑️",
        }
    }
}

/// What a finished task reports. An empty message means "use the last status".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskResult {
    pub icon: Option<ResultIcon>,
    pub message: String,
}

impl TaskResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            icon: Some(ResultIcon::Success),
            message: message.into(),
        }
    }

    pub fn unchanged(message: impl Into<String>) -> Self {
        Self {
            icon: Some(ResultIcon::Unchanged),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub tone: Tone,
}

/// A headline followed by optional detail lines.
///
/// `Display` renders the plain multi-line text; surfaces that can style
/// output use `tone` to set stderr lines apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub headline: String,
    pub lines: Vec<StatusLine>,
}

impl Status {
    pub fn new(headline: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, text: impl Into<String>, tone: Tone) {
        self.lines.push(StatusLine {
            text: text.into(),
            tone,
        });
    }
}

impl From<String> for Status {
    fn from(headline: String) -> Self {
        Self::new(headline)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.headline)?;
        for line in &self.lines {
            write!(f, "\n{}", line.text)?;
        }
        Ok(())
    }
}

/// Queue of non-fatal messages a task wants printed above the live status.
#[derive(Debug, Default)]
pub struct Notices(Mutex<Vec<String>>);

impl Notices {
    pub fn push(&self, message: impl Into<String>) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push(message.into());
        }
    }

    pub fn drain(&self) -> Vec<String> {
        self.0
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}

/// The closed set of tasks the build pipeline runs.
///
/// Each variant shares its task so the pipeline can read outputs (the
/// download's changed flag, the discovered feeds) once the run is over.
#[derive(Clone)]
pub enum BuildTask {
    Download(Arc<DownloadTask>),
    Extract(Arc<ExtractTask>),
    FeedDiscovery(Arc<FeedDiscoveryTask>),
    Container(Arc<ContainerTask>),
}

impl BuildTask {
    fn inner(&self) -> &dyn Task {
        match self {
            BuildTask::Download(t) => &**t,
            BuildTask::Extract(t) => &**t,
            BuildTask::FeedDiscovery(t) => &**t,
            BuildTask::Container(t) => &**t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BuildTask::Download(_) => "download",
            BuildTask::Extract(_) => "extract",
            BuildTask::FeedDiscovery(_) => "feed-discovery",
            BuildTask::Container(_) => "container",
        }
    }
}

impl Task for BuildTask {
    fn status(&self) -> Status {
        self.inner().status()
    }

    fn run(&self) -> Result<TaskResult> {
        self.inner().run()
    }

    fn drain_notices(&self) -> Vec<String> {
        self.inner().drain_notices()
    }
}
