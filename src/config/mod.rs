mod loader;
mod types;

pub use loader::CONFIG_FILE_NAME;
pub use types::{AREA_PLACEHOLDER, Config, Overrides};
