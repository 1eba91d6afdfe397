//! reelsmith library crate.
//!
//! Turns one source image into a chain of generated video segments, joins
//! them with cross-fades and applies optional finishing stages.

pub mod assembly;
pub mod cancel;
pub mod chain;
pub mod cli;
pub mod clock;
pub mod concat;
pub mod config;
pub mod media;
pub mod planner;
pub mod project;
pub mod provider;
pub mod run;
pub mod tracker;
