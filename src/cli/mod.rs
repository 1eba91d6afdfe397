//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing, enums, and subcommand handlers.

mod args;
mod commands;
mod enums;

pub use args::{Args, BrandingArgs, Command, ConfigAction, SourceArgs};
pub use commands::{
    assemble, build_provider, concat, generate, handle_config_action, plan, provider_bounds, run,
};
pub use enums::{Position, Provider, Style};
