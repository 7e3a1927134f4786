// Presentation surfaces for the task runner.

pub mod plain;
pub mod style;
pub mod terminal;

pub use plain::PlainSurface;
pub use terminal::{TerminalSurface, restore_terminal};
