//! Warp orchestration: options, output grid, block engine and progress.

pub mod engine;
pub mod grid;
pub mod options;
pub mod progress;

pub use engine::{warp, warp_to_store, WarpOperation, WarpState};
pub use grid::OutputGrid;
pub use options::{CutlineSource, InitDest, WarpOptions};
pub use progress::{NoProgress, ProgressSink};
