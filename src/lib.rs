#![doc = include_str!("../README.md")]

pub mod admin;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod grid;
pub mod logging;
pub mod node;
pub mod registry;
pub mod status;
pub mod transacted;

/// the current app version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
