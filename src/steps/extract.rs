use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::task::{Status, Task, TaskResult};

/// Unpacks a tar archive into a directory.
pub struct ExtractTask {
    source: PathBuf,
    dest: PathBuf,
    status: Mutex<String>,
}

impl ExtractTask {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let status = format!("extracting {}", source.display());
        Self {
            source,
            dest: dest.into(),
            status: Mutex::new(status),
        }
    }

    fn set_status(&self, text: String) {
        if let Ok(mut status) = self.status.lock() {
            *status = text;
        }
    }
}

impl Task for ExtractTask {
    fn status(&self) -> Status {
        self.status
            .lock()
            .map(|s| Status::new(s.clone()))
            .unwrap_or_else(|_| Status::new(format!("extracting {}", self.source.display())))
    }

    fn run(&self) -> Result<TaskResult> {
        let file = File::open(&self.source)
            .with_context(|| format!("error reading {}", self.source.display()))?;
        std::fs::create_dir_all(&self.dest)
            .with_context(|| format!("error making directory {}", self.dest.display()))?;

        let mut archive = tar::Archive::new(file);
        let entries = archive.entries().context("error reading tar file")?;

        let mut count = 0usize;
        for entry in entries {
            let mut entry = entry.context("error reading tar file")?;
            count += 1;

            let path = entry
                .path()
                .map(|p| self.dest.join(p))
                .context("error reading tar file")?;
            self.set_status(format!(
                "extracting {} ({count} - {})",
                self.source.display(),
                path.display()
            ));

            // unpack_in refuses entries that would land outside `dest`.
            let unpacked = entry
                .unpack_in(&self.dest)
                .with_context(|| format!("error extracting file {}", path.display()))?;
            if !unpacked {
                bail!("refusing to extract {} outside {}", path.display(), self.dest.display());
            }
        }

        debug!(source = %self.source.display(), files = count, "extracted archive");
        Ok(TaskResult::success(format!(
            "extracted {} ({count} files)",
            self.source.display()
        )))
    }
}
