//! hopshare CLI library
//!
//! Command implementations and terminal output helpers used by the
//! `hopshare` binary.

pub mod commands;
pub mod output;
