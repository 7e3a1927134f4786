use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::steps::{BoundingBox, DEFAULT_FEED_LIST_URL};

/// Placeholder replaced by the area name in `osm_url`.
pub const AREA_PLACEHOLDER: &str = "{area}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub area: Option<String>,
    pub country: Option<String>,
    pub osm_url: String,
    pub sources_url: String,
    pub gtfs_list_url: String,
    pub bbox: Option<BoundingBox>,
    pub planetiler_image: String,
    pub container_socket: Option<String>,
    pub run_as_invoking_user: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            area: None,
            country: None,
            osm_url: "https://download.bbbike.org/osm/bbbike/{area}/{area}.osm.pbf".to_string(),
            sources_url: "https://f000.backblazeb2.com/file/headway/sources.tar".to_string(),
            gtfs_list_url: DEFAULT_FEED_LIST_URL.to_string(),
            bbox: None,
            planetiler_image: "ghcr.io/onthegomap/planetiler".to_string(),
            container_socket: None,
            run_as_invoking_user: false,
            log_file: None,
        }
    }
}

/// Values given on the command line. `None` leaves the file's value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub area: Option<String>,
    pub country: Option<String>,
}

impl Config {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(area) = overrides.area {
            self.area = Some(area);
        }
        if let Some(country) = overrides.country {
            self.country = Some(country);
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.area.as_deref().map(str::trim) {
            None | Some("") => bail!("no area selected; pass --area or set `area` in the config"),
            Some(_) => {}
        }
        if let Some(bbox) = &self.bbox {
            if bbox.min_lon > bbox.max_lon || bbox.min_lat > bbox.max_lat {
                bail!(
                    "invalid bbox: minimum exceeds maximum ({}, {}, {}, {})",
                    bbox.min_lon,
                    bbox.min_lat,
                    bbox.max_lon,
                    bbox.max_lat
                );
            }
        }
        Ok(())
    }

    /// Download URL of the area's OSM extract.
    pub fn osm_url_for_area(&self) -> String {
        self.osm_url
            .replace(AREA_PLACEHOLDER, self.area.as_deref().unwrap_or_default())
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("headway-build.log"))
    }

    pub fn data_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(name)
    }
}
