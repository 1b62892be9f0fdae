//! Command handlers for the `relay` binary

pub mod commands;

pub use commands::*;
