//! Builds the data a Headway map server needs: downloads the area's OSM
//! extract and supporting sources, finds transit feeds, and runs the tile
//! builder in a container, showing live progress for each step.

pub mod config;
pub mod container;
pub mod logging;
pub mod pipeline;
pub mod steps;
pub mod task;
pub mod ui;
