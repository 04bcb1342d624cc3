//! Pure, deterministic engine logic.
//!
//! Nothing in here touches the filesystem, spawns processes, or talks to a
//! model. The engine feeds these functions data gathered by [`crate::io`].

pub mod memory;
pub mod outcome;
pub mod parse;
pub mod plan;
pub mod report;
pub mod routing;
pub mod types;
