// Collaborator steps the pipeline runs around the container build.

pub mod download;
pub mod extract;
pub mod gtfs;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

pub use download::DownloadTask;
pub use extract::ExtractTask;
pub use gtfs::{BoundingBox, DEFAULT_FEED_LIST_URL, FeedDiscoveryTask, GtfsFeed};

/// HTTP client for the steps. Requests are never timed out.
pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(None::<Duration>)
        .build()
        .context("error building HTTP client")
}
