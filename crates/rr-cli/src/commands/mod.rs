//! CLI subcommand implementations.

pub mod render;
pub mod replay;
pub mod rules;
pub mod status;
