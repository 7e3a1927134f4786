use std::io::Read;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::http_client;
use crate::task::{Notices, Status, Task, TaskResult};

/// MobilityData catalog of transit feeds (https://database.mobilitydata.org).
pub const DEFAULT_FEED_LIST_URL: &str =
    "https://storage.googleapis.com/storage/v1/b/mdb-csv/o/sources.csv?alt=media";

const COLUMN_PROVIDER: usize = 6;
const COLUMN_URL: usize = 14;
const COLUMN_MIN_LAT: usize = 16;
const COLUMN_MAX_LAT: usize = 17;
const COLUMN_MIN_LON: usize = 18;
const COLUMN_MAX_LON: usize = 19;
const MIN_COLUMNS: usize = COLUMN_MAX_LON + 1;

// Feeds spanning more than this are operators that run "everywhere".
const MAX_LAT_SPAN: f64 = 18.0;
const MAX_LON_SPAN: f64 = 16.0;

/// Geographic extent in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtfsFeed {
    pub provider: String,
    /// Last path segment of the URL.
    pub filename: String,
    pub url: String,
}

impl GtfsFeed {
    /// Directory-safe form of the provider name.
    pub fn provider_slug(&self) -> String {
        let mut slug = String::with_capacity(self.provider.len());
        for c in self.provider.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_end_matches('-');
        if slug.is_empty() {
            "unknown".to_string()
        } else {
            slug.to_string()
        }
    }
}

/// Finds the transit feeds whose coverage overlaps an area.
pub struct FeedDiscoveryTask {
    list_url: String,
    area: BoundingBox,
    processed: AtomicUsize,
    found: AtomicUsize,
    feeds: Mutex<Vec<GtfsFeed>>,
    notices: Notices,
}

impl FeedDiscoveryTask {
    pub fn new(list_url: impl Into<String>, area: BoundingBox) -> Self {
        Self {
            list_url: list_url.into(),
            area,
            processed: AtomicUsize::new(0),
            found: AtomicUsize::new(0),
            feeds: Mutex::new(Vec::new()),
            notices: Notices::default(),
        }
    }

    /// Feeds found by the last run.
    pub fn feeds(&self) -> Vec<GtfsFeed> {
        self.feeds.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Read a feed list, keeping the rows that cover `area`.
    pub fn scan<R: Read>(&self, reader: R) -> Result<Vec<GtfsFeed>> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut feeds = Vec::new();
        for record in csv.records() {
            let processed = self.processed.load(Ordering::Relaxed);
            let row = record
                .with_context(|| format!("error parsing line {processed} of GTFS feed list"))?;

            if row.len() < MIN_COLUMNS {
                self.notices
                    .push(format!("invalid line in gtfs feed list: {processed}"));
                continue;
            }

            let bound = |i: usize| row.get(i).and_then(|v| v.trim().parse().ok()).unwrap_or(0.0);
            let extent = BoundingBox {
                min_lon: bound(COLUMN_MIN_LON),
                min_lat: bound(COLUMN_MIN_LAT),
                max_lon: bound(COLUMN_MAX_LON),
                max_lat: bound(COLUMN_MAX_LAT),
            };
            self.processed.fetch_add(1, Ordering::Relaxed);

            if extent.max_lat - extent.min_lat > MAX_LAT_SPAN
                || extent.max_lon - extent.min_lon > MAX_LON_SPAN
            {
                continue;
            }

            let raw_url = row.get(COLUMN_URL).unwrap_or_default();
            if raw_url.is_empty() || !extent.overlaps(&self.area) {
                continue;
            }

            let provider = row.get(COLUMN_PROVIDER).unwrap_or_default();
            let url = Url::parse(raw_url)
                .with_context(|| format!("error parsing {provider} feed URL {raw_url}"))?;
            let filename = url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .filter(|s| !s.is_empty())
                .unwrap_or("feed.zip")
                .to_string();

            debug!(%provider, %url, "feed overlaps area");
            feeds.push(GtfsFeed {
                provider: provider.to_string(),
                filename,
                url: url.to_string(),
            });
            self.found.fetch_add(1, Ordering::Relaxed);
        }

        Ok(feeds)
    }
}

impl Task for FeedDiscoveryTask {
    fn status(&self) -> Status {
        Status::new(format!(
            "looking for gtfs feeds within selected area ({}/{})",
            self.found.load(Ordering::Relaxed),
            self.processed.load(Ordering::Relaxed)
        ))
    }

    fn run(&self) -> Result<TaskResult> {
        let response = http_client()?
            .get(&self.list_url)
            .send()
            .and_then(|r| r.error_for_status())
            .context("error fetching GTFS feed list")?;

        let feeds = self.scan(response)?;
        let count = feeds.len();
        info!(count, url = %self.list_url, "feed discovery finished");
        if let Ok(mut slot) = self.feeds.lock() {
            *slot = feeds;
        }

        let message = format!("found {count} transit feeds");
        if count == 0 {
            Ok(TaskResult::unchanged(message))
        } else {
            Ok(TaskResult::success(message))
        }
    }

    fn drain_notices(&self) -> Vec<String> {
        self.notices.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Seattle-ish.
    const AREA: BoundingBox = BoundingBox {
        min_lon: -122.5,
        min_lat: 47.4,
        max_lon: -122.2,
        max_lat: 47.8,
    };

    fn row(provider: &str, url: &str, lat: (f64, f64), lon: (f64, f64)) -> String {
        let mut cols = vec![String::new(); MIN_COLUMNS];
        cols[COLUMN_PROVIDER] = provider.to_string();
        cols[COLUMN_URL] = url.to_string();
        cols[COLUMN_MIN_LAT] = lat.0.to_string();
        cols[COLUMN_MAX_LAT] = lat.1.to_string();
        cols[COLUMN_MIN_LON] = lon.0.to_string();
        cols[COLUMN_MAX_LON] = lon.1.to_string();
        cols.join(",")
    }

    fn list(rows: &[String]) -> String {
        let header: Vec<String> = (0..MIN_COLUMNS).map(|i| format!("col{i}")).collect();
        let mut out = header.join(",");
        for r in rows {
            out.push('\n');
            out.push_str(r);
        }
        out.push('\n');
        out
    }

    #[test]
    fn keeps_overlapping_feeds() {
        let csv = list(&[row(
            "King County Metro",
            "https://example.com/feeds/kcm/google_transit.zip",
            (47.0, 48.0),
            (-122.6, -121.0),
        )]);
        let task = FeedDiscoveryTask::new("unused", AREA);
        let feeds = task.scan(csv.as_bytes()).unwrap();

        assert_eq!(
            feeds,
            vec![GtfsFeed {
                provider: "King County Metro".into(),
                filename: "google_transit.zip".into(),
                url: "https://example.com/feeds/kcm/google_transit.zip".into(),
            }]
        );
        assert_eq!(
            task.status().to_string(),
            "looking for gtfs feeds within selected area (1/1)"
        );
    }

    #[test]
    fn skips_distant_wide_and_urlless_rows() {
        let csv = list(&[
            row("Far", "https://example.com/far.zip", (40.0, 41.0), (-74.5, -73.5)),
            row("Everywhere", "https://example.com/all.zip", (20.0, 60.0), (-125.0, -70.0)),
            row("No URL", "", (47.0, 48.0), (-123.0, -122.0)),
        ]);
        let task = FeedDiscoveryTask::new("unused", AREA);
        assert!(task.scan(csv.as_bytes()).unwrap().is_empty());
        assert_eq!(
            task.status().to_string(),
            "looking for gtfs feeds within selected area (0/3)"
        );
    }

    #[test]
    fn short_rows_raise_a_notice() {
        let csv = list(&["a,b,c".to_string()]);
        let task = FeedDiscoveryTask::new("unused", AREA);
        assert!(task.scan(csv.as_bytes()).unwrap().is_empty());
        assert_eq!(
            task.drain_notices(),
            vec!["invalid line in gtfs feed list: 0"]
        );
    }

    #[test]
    fn unparseable_bounds_read_as_zero() {
        let mut r = row("Null Island", "https://example.com/n.zip", (0.0, 0.0), (0.0, 0.0));
        r = r.replace("0,0,0,0", "x,y,z,w");
        let area = BoundingBox {
            min_lon: -1.0,
            min_lat: -1.0,
            max_lon: 1.0,
            max_lat: 1.0,
        };
        let task = FeedDiscoveryTask::new("unused", area);
        let feeds = task.scan(list(&[r]).as_bytes()).unwrap();
        assert_eq!(feeds.len(), 1);
    }

    #[test]
    fn bad_url_names_provider() {
        let csv = list(&[row("Broken", "not a url", (47.0, 48.0), (-123.0, -122.0))]);
        let task = FeedDiscoveryTask::new("unused", AREA);
        let err = task.scan(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Broken feed URL not a url"));
    }

    #[test]
    fn provider_slug_is_path_safe() {
        let feed = GtfsFeed {
            provider: "Sound Transit / Link (WA)".into(),
            filename: "x.zip".into(),
            url: "https://example.com/x.zip".into(),
        };
        assert_eq!(feed.provider_slug(), "sound-transit-link-wa");

        let blank = GtfsFeed {
            provider: "  ".into(),
            ..feed
        };
        assert_eq!(blank.provider_slug(), "unknown");
    }

    #[test]
    fn overlap_is_symmetric_and_inclusive() {
        let touching = BoundingBox {
            min_lon: -122.2,
            min_lat: 47.8,
            max_lon: -121.0,
            max_lat: 48.0,
        };
        assert!(AREA.overlaps(&touching));
        assert!(touching.overlaps(&AREA));
    }
}
