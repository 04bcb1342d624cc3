//! I/O helpers for the engine and its agents.

pub mod config;
pub mod fs_util;
pub mod input;
pub mod ledger;
pub mod model;
pub mod process;
pub mod prompt;
pub mod workspace;
