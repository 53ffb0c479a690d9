//! Arxen CLI library
//!
//! This library provides the components of the `arxen` binary: argument parsing, the
//! TOML configuration, the interactive prompt and the command dispatcher.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::{parse_input, ArxenApp, InputCommand, Reply};
pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
