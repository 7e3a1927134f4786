use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Response;
use reqwest::header::{HeaderMap, LAST_MODIFIED};
use tracing::{debug, info, warn};

use super::http_client;
use crate::task::{Notices, Status, Task, TaskResult};

/// Backblaze B2 upload time in epoch milliseconds.
const BZ_UPLOAD_TIMESTAMP: &str = "X-Bz-Upload-Timestamp";

/// Downloads a URL to a file, skipping the transfer when the local copy is current.
pub struct DownloadTask {
    url: String,
    dest: PathBuf,
    name: String,
    progress: Mutex<Option<Arc<Progress>>>,
    changed: AtomicBool,
    notices: Notices,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        let dest = dest.into();
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dest.display().to_string());
        Self {
            url: url.into(),
            dest,
            name,
            progress: Mutex::new(None),
            changed: AtomicBool::new(false),
            notices: Notices::default(),
        }
    }

    /// Display name, e.g. `data.osm.pbf`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether the run replaced the file on disk.
    pub fn changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }
}

impl Task for DownloadTask {
    fn status(&self) -> Status {
        let progress = self.progress.lock().ok().and_then(|p| p.clone());
        let Some(progress) = progress else {
            return Status::new(format!("downloading {}", self.name));
        };

        let read = progress.read();
        match progress.total {
            _ if progress.is_done() => Status::new(format!("downloaded {}", self.name)),
            Some(total) if total > 0 => Status::new(format!(
                "downloading {} ({:.2}%)",
                self.name,
                read as f64 / total as f64 * 100.0
            )),
            _ => Status::new(format!("downloading {} ({read} bytes)", self.name)),
        }
    }

    fn run(&self) -> Result<TaskResult> {
        if let Some(dir) = self.dest.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("error creating directory {}", dir.display()))?;
        }

        let existing = match std::fs::metadata(&self.dest) {
            Ok(meta) => Some(meta.modified().with_context(|| {
                format!("error checking target file {}", self.dest.display())
            })?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("error checking target file {}", self.dest.display()));
            }
        };

        let client = http_client()?;
        let head = client
            .head(&self.url)
            .send()
            .with_context(|| format!("error making HEAD request to {} before downloading", self.url))?;

        match should_redownload(head.headers(), existing) {
            Decision::Download => {}
            Decision::Keep => {
                info!(url = %self.url, dest = %self.dest.display(), "local copy is current");
                return Ok(TaskResult::unchanged(format!("{} is up to date", self.name)));
            }
            Decision::KeepUnparseable(reason) => {
                self.notices.push(format!(
                    "error parsing modification time from server, not re-downloading: {reason}"
                ));
                return Ok(TaskResult::unchanged(format!("{} is up to date", self.name)));
            }
        }

        let response = client
            .get(&self.url)
            .send()
            .with_context(|| format!("error downloading {}", self.url))?;
        if response.status() != StatusCode::OK {
            bail!(
                "receiving status of {} for url: {}",
                response.status().as_u16(),
                self.url
            );
        }

        let progress = Arc::new(Progress::new(response.content_length()));
        if let Ok(mut slot) = self.progress.lock() {
            *slot = Some(Arc::clone(&progress));
        }

        // `dest` is only ever replaced by a complete transfer.
        let part = part_path(&self.dest);
        if let Err(err) = self.fetch_into(response, &part, &progress) {
            if let Err(cleanup) = std::fs::remove_file(&part)
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %part.display(), error = %cleanup, "could not remove partial download");
            }
            return Err(err);
        }
        std::fs::rename(&part, &self.dest).with_context(|| {
            format!("error moving {} into place", part.display())
        })?;
        progress.finish();
        self.changed.store(true, Ordering::Release);

        debug!(bytes = progress.read(), dest = %self.dest.display(), "download complete");
        Ok(TaskResult::success(format!("downloaded {}", self.name)))
    }

    fn drain_notices(&self) -> Vec<String> {
        self.notices.drain()
    }
}

impl DownloadTask {
    fn fetch_into(&self, response: Response, part: &Path, progress: &Arc<Progress>) -> Result<()> {
        let file = File::create(part)
            .with_context(|| format!("error creating {}", part.display()))?;
        let mut reader = ProgressReader {
            inner: response,
            progress: Arc::clone(progress),
        };
        let mut writer = BufWriter::new(file);
        io::copy(&mut reader, &mut writer)
            .with_context(|| format!("error downloading {}", self.name))?;
        io::Write::flush(&mut writer)
            .with_context(|| format!("error writing {}", part.display()))?;
        Ok(())
    }
}

/// `<dest>.part`, next to the destination so the final rename stays on one filesystem.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Download,
    Keep,
    /// The server sent a timestamp we could not read.
    KeepUnparseable(String),
}

/// Decide whether to fetch again given the server's headers and the local
/// file's modification time.
///
/// Without any server timestamp there is nothing to compare, so the file is
/// fetched again.
pub fn should_redownload(headers: &HeaderMap, existing: Option<SystemTime>) -> Decision {
    let remote = match last_modified(headers) {
        Ok(Some(time)) => time,
        Ok(None) => return Decision::Download,
        Err(reason) => return Decision::KeepUnparseable(reason),
    };

    match existing {
        None => Decision::Download,
        Some(local) if DateTime::<Utc>::from(local) > remote => Decision::Keep,
        Some(_) => Decision::Download,
    }
}

fn last_modified(headers: &HeaderMap) -> Result<Option<DateTime<Utc>>, String> {
    if let Some(value) = headers.get(LAST_MODIFIED) {
        let text = value.to_str().map_err(|e| e.to_string())?;
        return DateTime::parse_from_rfc2822(text)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| format!("{text}: {e}"));
    }

    if let Some(value) = headers.get(BZ_UPLOAD_TIMESTAMP) {
        let text = value.to_str().map_err(|e| e.to_string())?;
        let millis: i64 = text.parse().map_err(|e| format!("{text}: {e}"))?;
        return DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| format!("{text}: out of range"));
    }

    Ok(None)
}

/// Bytes read so far against the advertised length.
#[derive(Debug)]
struct Progress {
    total: Option<u64>,
    read: AtomicU64,
    done: AtomicBool,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total,
            read: AtomicU64::new(0),
            done: AtomicBool::new(false),
        }
    }

    fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    fn finish(&self) {
        self.done.store(true, Ordering::Release);
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

struct ProgressReader<R> {
    inner: R,
    progress: Arc<Progress>,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}
