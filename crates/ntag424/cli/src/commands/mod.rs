//! Subcommand handlers

mod config;
mod simulate;
mod sun;

pub use config::*;
pub use simulate::*;
pub use sun::*;

/// Factory UID of the simulated tag, used when no UID is given
pub const SIMULATOR_UID: &str = "048D58D2142290";
