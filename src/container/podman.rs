use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerWaitResponse, HostConfig};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures_util::stream::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::log::LogSink;
use super::runtime::{BoxError, Connector, ContainerRuntime, CreateRequest, Created};

/// Per-request timeout handed to the client. Runtime calls are not meant to
/// time out, so this is set far beyond any build.
const REQUEST_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Connects to Podman (or Docker) through its Docker-compatible API socket.
#[derive(Debug, Clone)]
pub struct PodmanConnector {
    socket: PathBuf,
}

impl PodmanConnector {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }
}

impl Connector for PodmanConnector {
    fn connect(&self) -> Result<Box<dyn ContainerRuntime>, BoxError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("podman-client")
            .enable_all()
            .build()?;

        let socket = self.socket.to_string_lossy().into_owned();
        let docker = {
            let _guard = runtime.enter();
            Docker::connect_with_unix(&socket, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        };
        runtime.block_on(docker.ping())?;
        debug!(%socket, "connected to container runtime");

        Ok(Box::new(PodmanRuntime {
            docker,
            runtime,
            streams: Mutex::new(None),
        }))
    }
}

/// A live API session. Blocking calls drive the async client on a private runtime.
pub struct PodmanRuntime {
    docker: Docker,
    runtime: Runtime,
    streams: Mutex<Option<JoinHandle<()>>>,
}

impl ContainerRuntime for PodmanRuntime {
    fn pull_image(&self, image: &str) -> Result<(), BoxError> {
        let (name, tag) = super::runtime::image_reference(image);
        let options = CreateImageOptions {
            from_image: name.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        self.runtime.block_on(async {
            let mut progress = self.docker.create_image(Some(options), None, None);
            while let Some(info) = progress.next().await {
                let info = info?;
                if let Some(status) = info.status {
                    debug!(%image, %status, "pull progress");
                }
            }
            Ok::<(), BoxError>(())
        })
    }

    fn create_container(&self, request: &CreateRequest) -> Result<Created, BoxError> {
        let binds: Vec<String> = request.mounts.iter().map(|m| m.to_bind()).collect();
        let config = Config {
            image: Some(request.image.clone()),
            entrypoint: non_empty(&request.entrypoint),
            cmd: non_empty(&request.command),
            user: request.user.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self.runtime.block_on(
            self.docker
                .create_container(None::<CreateContainerOptions<String>>, config),
        )?;
        Ok(Created {
            id: response.id,
            warnings: response.warnings,
        })
    }

    fn start_container(&self, id: &str) -> Result<(), BoxError> {
        self.runtime.block_on(
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>),
        )?;
        Ok(())
    }

    fn attach(&self, id: &str, mut stdout: LogSink, mut stderr: LogSink) -> Result<(), BoxError> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { mut output, .. } = self
            .runtime
            .block_on(self.docker.attach_container(id, Some(options)))?;

        let id = id.to_string();
        let handle = self.runtime.spawn(async move {
            while let Some(chunk) = output.next().await {
                let written = match chunk {
                    Ok(LogOutput::StdErr { message }) => stderr.write_all(&message),
                    Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                        stdout.write_all(&message)
                    }
                    Ok(LogOutput::StdIn { .. }) => Ok(()),
                    Err(err) => {
                        warn!(%id, error = %err, "container output stream ended");
                        break;
                    }
                };
                if let Err(err) = written {
                    warn!(%id, error = %err, "could not record container output");
                }
            }
        });

        if let Ok(mut streams) = self.streams.lock() {
            *streams = Some(handle);
        }
        Ok(())
    }

    fn wait_container(&self, id: &str) -> Result<i64, BoxError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let responses: Vec<_> = self
            .runtime
            .block_on(self.docker.wait_container(id, Some(options)).collect());
        let code = exit_code(responses)?;

        let streams = self.streams.lock().ok().and_then(|mut s| s.take());
        if let Some(handle) = streams {
            let _ = self.runtime.block_on(handle);
        }
        Ok(code)
    }

    fn remove_container(&self, id: &str) -> Result<(), BoxError> {
        self.runtime.block_on(
            self.docker
                .remove_container(id, None::<RemoveContainerOptions>),
        )?;
        Ok(())
    }
}

/// Exit status carried by the responses of a wait call.
fn exit_code(
    responses: impl IntoIterator<Item = Result<ContainerWaitResponse, BollardError>>,
) -> Result<i64, BoxError> {
    let mut code = None;
    for response in responses {
        match response {
            Ok(body) => {
                if let Some(message) = body.error.and_then(|e| e.message)
                    && !message.is_empty()
                {
                    return Err(message.into());
                }
                code = Some(body.status_code);
            }
            // The client reports a non-zero exit as an error carrying the code.
            Err(BollardError::DockerContainerWaitError { error, code: exit }) => {
                if !error.is_empty() {
                    return Err(error.into());
                }
                code = Some(exit);
            }
            Err(err) => return Err(err.into()),
        }
    }
    code.ok_or_else(|| "runtime returned no exit status".into())
}

fn non_empty(args: &[String]) -> Option<Vec<String>> {
    if args.is_empty() {
        None
    } else {
        Some(args.to_vec())
    }
}
