use std::path::Path;

use anyhow::{Context, Result};

use super::types::Config;

pub const CONFIG_FILE_NAME: &str = ".headway-build.yaml";

impl Config {
    /// Load `.headway-build.yaml` from `dir`, or defaults when it is absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_path(&path)
    }

    /// Load an explicitly named config file. The file must exist.
    pub fn load_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("error reading config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("error parsing config {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        // An empty file deserializes to null rather than an empty mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
