//! Output helpers

pub mod display;
