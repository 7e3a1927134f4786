use std::path::{Component, Path, PathBuf};

use super::log::LogSink;
use super::{ContainerError, Volume};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Opens a session with a container runtime.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn ContainerRuntime>, BoxError>;
}

/// The runtime calls the orchestrator needs, one per lifecycle step.
pub trait ContainerRuntime {
    /// Fetch `image`; a no-op when it is already present.
    fn pull_image(&self, image: &str) -> Result<(), BoxError>;

    fn create_container(&self, request: &CreateRequest) -> Result<Created, BoxError>;

    fn start_container(&self, id: &str) -> Result<(), BoxError>;

    /// Begin streaming the container's output into the sinks.
    ///
    /// Returns once streaming is set up; the sinks are dropped when the
    /// container's streams close.
    fn attach(&self, id: &str, stdout: LogSink, stderr: LogSink) -> Result<(), BoxError>;

    /// Block until the container is no longer running and return its exit code.
    fn wait_container(&self, id: &str) -> Result<i64, BoxError>;

    fn remove_container(&self, id: &str) -> Result<(), BoxError>;
}

/// Everything submitted when creating a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub image: String,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub user: Option<String>,
    pub mounts: Vec<BindMount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Created {
    pub id: String,
    pub warnings: Vec<String>,
}

/// A host directory bound into the container. `source` is always absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub destination: String,
    pub options: Vec<String>,
}

impl BindMount {
    /// Resolve `volume` against `base`, the directory relative sources are taken from.
    ///
    /// The runtime daemon does not share our working directory, so a relative
    /// source must never reach it.
    pub fn resolve(volume: &Volume, base: &Path) -> Result<Self, ContainerError> {
        if volume.source.as_os_str().is_empty() {
            return Err(ContainerError::InvalidMount(format!(
                "empty source for {}",
                volume.destination
            )));
        }
        if volume.destination.is_empty() {
            return Err(ContainerError::InvalidMount(format!(
                "empty destination for {}",
                volume.source.display()
            )));
        }
        if !base.is_absolute() {
            return Err(ContainerError::InvalidMount(format!(
                "cannot resolve {} against relative directory {}",
                volume.source.display(),
                base.display()
            )));
        }

        Ok(Self {
            source: normalize(&base.join(&volume.source)),
            destination: volume.destination.clone(),
            options: volume.options.clone(),
        })
    }

    /// `source:destination[:options]`, the runtime's bind syntax.
    pub fn to_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.source.display(), self.destination);
        if !self.options.is_empty() {
            bind.push(':');
            bind.push_str(&self.options.join(","));
        }
        bind
    }
}

/// Lexically clean an absolute path: drop `.` and apply `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Socket the runtime listens on: the configured override, else Podman's
/// per-user socket under `$XDG_RUNTIME_DIR`, else the system one.
pub fn socket_path(configured: Option<&str>) -> PathBuf {
    if let Some(socket) = configured.filter(|s| !s.is_empty()) {
        let trimmed = socket
            .strip_prefix("unix://")
            .or_else(|| socket.strip_prefix("unix:"))
            .unwrap_or(socket);
        return PathBuf::from(trimmed);
    }

    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/run"));
    dir.join("podman").join("podman.sock")
}

/// Split an image reference into name and tag, defaulting the tag to `latest`.
pub fn image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.rfind(':') {
        Some(pos) => {
            let split = image.len() - last_segment.len() + pos;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

/// `uid:gid` of the invoking user, so containers write files we own.
pub fn invoking_user() -> Option<String> {
    #[cfg(unix)]
    {
        // SAFETY: geteuid() and getegid() are simple POSIX getters that always succeed and have no side effects.
        let uid = unsafe { libc::geteuid() };
        let gid = unsafe { libc::getegid() };
        Some(format!("{uid}:{gid}"))
    }

    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(source: &str, destination: &str) -> Volume {
        Volume {
            source: PathBuf::from(source),
            destination: destination.into(),
            options: Vec::new(),
        }
    }

    #[test]
    fn relative_source_joins_base() {
        let mount = BindMount::resolve(&volume("data", "/data"), Path::new("/home/me/build"))
            .expect("should resolve");
        assert_eq!(mount.source, PathBuf::from("/home/me/build/data"));
        assert!(mount.source.is_absolute());
        assert_eq!(mount.destination, "/data");
    }

    #[test]
    fn dot_segments_are_cleaned() {
        let mount = BindMount::resolve(&volume("./out/../data/.", "/data"), Path::new("/srv"))
            .expect("should resolve");
        assert_eq!(mount.source, PathBuf::from("/srv/data"));
    }

    #[test]
    fn absolute_source_is_kept() {
        let mount = BindMount::resolve(&volume("/mnt/osm", "/data"), Path::new("/srv"))
            .expect("should resolve");
        assert_eq!(mount.source, PathBuf::from("/mnt/osm"));
    }

    #[test]
    fn empty_source_is_rejected() {
        let err = BindMount::resolve(&volume("", "/data"), Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidMount(_)));
        assert!(err.to_string().starts_with("invalid volume mount request"));
    }

    #[test]
    fn bind_string_includes_options() {
        let mut vol = volume("/srv/data", "/data");
        assert_eq!(
            BindMount::resolve(&vol, Path::new("/")).unwrap().to_bind(),
            "/srv/data:/data"
        );
        vol.options = vec!["ro".into(), "z".into()];
        assert_eq!(
            BindMount::resolve(&vol, Path::new("/")).unwrap().to_bind(),
            "/srv/data:/data:ro,z"
        );
    }

    #[test]
    fn configured_socket_strips_scheme() {
        assert_eq!(
            socket_path(Some("unix:///run/podman/podman.sock")),
            PathBuf::from("/run/podman/podman.sock")
        );
        assert_eq!(
            socket_path(Some("unix:/tmp/p.sock")),
            PathBuf::from("/tmp/p.sock")
        );
        assert_eq!(socket_path(Some("/tmp/p.sock")), PathBuf::from("/tmp/p.sock"));
    }

    #[test]
    fn default_socket_is_podman() {
        assert!(socket_path(None).ends_with("podman/podman.sock"));
    }

    #[test]
    fn image_reference_defaults_tag() {
        assert_eq!(image_reference("demo:latest"), ("demo", "latest"));
        assert_eq!(
            image_reference("ghcr.io/onthegomap/planetiler"),
            ("ghcr.io/onthegomap/planetiler", "latest")
        );
        assert_eq!(
            image_reference("localhost:5000/tiles:0.7"),
            ("localhost:5000/tiles", "0.7")
        );
        assert_eq!(
            image_reference("localhost:5000/tiles"),
            ("localhost:5000/tiles", "latest")
        );
    }

    #[cfg(unix)]
    #[test]
    fn invoking_user_is_uid_gid() {
        let user = invoking_user().expect("unix always has a user");
        assert!(user.contains(':'));
    }
}
