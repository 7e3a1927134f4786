// The build pipeline: each step runs through the Runner, one after another.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::container::runtime::{invoking_user, socket_path};
use crate::container::{ContainerSpec, ContainerTask, PhaseNames, PodmanConnector, Volume};
use crate::steps::{DownloadTask, ExtractTask, FeedDiscoveryTask, GtfsFeed};
use crate::task::{BuildTask, Halt, Runner, Surface};

pub const OSM_FILE: &str = "data.osm.pbf";
pub const SOURCES_FILE: &str = "sources.tar";
pub const SOURCES_DIR: &str = "sources";
pub const GTFS_DIR: &str = "gtfs";

/// Where the data directory is mounted inside the tile builder.
pub const CONTAINER_DATA_DIR: &str = "/data";

pub struct Pipeline {
    config: Config,
    base_dir: PathBuf,
}

impl Pipeline {
    /// `base_dir` is what a relative `data_dir` is resolved against.
    pub fn new(config: Config, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    /// Run every step in order, stopping at the first failure or cancel.
    pub fn run<S: Surface>(&self, runner: &mut Runner<S>) -> Result<(), Halt> {
        let config = &self.config;
        info!(
            area = config.area.as_deref().unwrap_or_default(),
            country = config.country.as_deref().unwrap_or_default(),
            data_dir = %config.data_dir.display(),
            "starting build"
        );

        let osm = DownloadTask::new(config.osm_url_for_area(), config.data_path(OSM_FILE));
        runner.execute(BuildTask::Download(Arc::new(osm)))?;

        let sources = Arc::new(DownloadTask::new(
            config.sources_url.clone(),
            config.data_path(SOURCES_FILE),
        ));
        runner.execute(BuildTask::Download(Arc::clone(&sources)))?;
        if sources.changed() {
            let extract = ExtractTask::new(sources.dest(), config.data_path(SOURCES_DIR));
            runner.execute(BuildTask::Extract(Arc::new(extract)))?;
        }

        if let Some(bbox) = config.bbox {
            let discovery = Arc::new(FeedDiscoveryTask::new(config.gtfs_list_url.clone(), bbox));
            runner.execute(BuildTask::FeedDiscovery(Arc::clone(&discovery)))?;

            let feeds = discovery.feeds();
            let destinations = feed_destinations(&config.data_dir, &feeds);
            for (feed, dest) in feeds.iter().zip(destinations) {
                let download = DownloadTask::new(feed.url.clone(), dest)
                    .with_name(format!("{} ({})", feed.filename, feed.provider));
                runner.execute(BuildTask::Download(Arc::new(download)))?;
            }
        }

        let connector = PodmanConnector::new(socket_path(config.container_socket.as_deref()));
        let tiles = ContainerTask::new(tile_build_spec(config), connector)
            .with_base_dir(&self.base_dir);
        runner.execute(BuildTask::Container(Arc::new(tiles)))?;

        info!("build finished");
        Ok(())
    }
}

/// `<data_dir>/gtfs/<provider-slug>/<filename>`
pub fn feed_destination(data_dir: &Path, feed: &GtfsFeed) -> PathBuf {
    data_dir
        .join(GTFS_DIR)
        .join(feed.provider_slug())
        .join(&feed.filename)
}

/// One destination per feed, in order. A path already handed out gets a
/// numbered stem, e.g. `google_transit-2.zip`.
pub fn feed_destinations(data_dir: &Path, feeds: &[GtfsFeed]) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    feeds
        .iter()
        .map(|feed| {
            let plain = feed_destination(data_dir, feed);
            let mut dest = plain.clone();
            let mut n = 2;
            while !taken.insert(dest.clone()) {
                dest = numbered(&plain, n);
                n += 1;
            }
            dest
        })
        .collect()
}

fn numbered(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{n}"),
    };
    path.with_file_name(name)
}

/// The planetiler run that turns the OSM extract into map tiles.
pub fn tile_build_spec(config: &Config) -> ContainerSpec {
    ContainerSpec {
        image: config.planetiler_image.clone(),
        names: PhaseNames {
            before: "build".into(),
            during: "building".into(),
            after: "built".into(),
            suffix: "map tiles".into(),
        },
        entrypoint: Vec::new(),
        command: vec![
            "--force".into(),
            format!("--osm_path={CONTAINER_DATA_DIR}/{OSM_FILE}"),
        ],
        volumes: vec![Volume {
            destination: CONTAINER_DATA_DIR.into(),
            source: config.data_dir.clone(),
            options: Vec::new(),
        }],
        user: if config.run_as_invoking_user {
            invoking_user()
        } else {
            None
        },
    }
}
