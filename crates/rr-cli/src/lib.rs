//! Voice call notifier CLI library.
//!
//! This crate provides the CLI interface for ringring.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, RuleTarget, RulesAction};
pub use config::Config;
