// Container orchestration: lifecycle state machine, runtime client, log tail.

pub mod log;
pub mod orchestrator;
pub mod podman;
pub mod runtime;

use std::path::PathBuf;

pub use log::{LOG_LINE_CAPACITY, LogBuffer, LogLine, LogSink};
pub use orchestrator::{ContainerTask, Phase};
pub use podman::PodmanConnector;
pub use runtime::{BindMount, BoxError, Connector, ContainerRuntime, CreateRequest, Created};

/// Labels shown before, during and after the container runs.
///
/// Each label is followed by `suffix`, e.g. "build" / "building" / "built"
/// with suffix "map tiles".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseNames {
    pub before: String,
    pub during: String,
    pub after: String,
    pub suffix: String,
}

/// A host directory to mount into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub destination: String,
    pub source: PathBuf,
    pub options: Vec<String>,
}

/// What container to run and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub names: PhaseNames,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub volumes: Vec<Volume>,
    pub user: Option<String>,
}

/// Failure of one lifecycle step. Every variant is fatal for the task.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("error connecting to runtime")]
    Connect(#[source] BoxError),

    #[error("error pulling image {image}")]
    Pull {
        image: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid volume mount request: {0}")]
    InvalidMount(String),

    #[error("error creating container")]
    Create(#[source] BoxError),

    #[error("error starting container")]
    Start(#[source] BoxError),

    #[error("error attaching to container stdout")]
    Attach(#[source] BoxError),

    // Failure of the wait call itself, not a claim about start vs. stop.
    #[error("error waiting for container to start")]
    Wait(#[source] BoxError),

    #[error("{label} exited with code {code}")]
    Exited { label: String, code: i64 },

    #[error("error cleaning up container")]
    Cleanup(#[source] BoxError),
}
