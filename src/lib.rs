//! Command-line client for the Elastic Cloud management API.
//!
//! The library holds everything the `ecctl` binary does: the HTTP adapter,
//! output formatting, plan tracking, the deployment payload builder, the
//! allocator vacate orchestrator and the configuration bootstrap.

pub mod api;
pub mod commands;
pub mod config;
pub mod deployment;
pub mod error;
pub mod format;
pub mod tracker;
pub mod utils;
pub mod vacate;

pub use commands::{run, Cli, Context};
pub use error::{Error, MultiError, Result};
