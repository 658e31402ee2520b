//! docshift-migrate library
//!
//! Exposes the CLI definitions and command handlers for testing.

pub mod cli;
pub mod commands;
pub mod error;
