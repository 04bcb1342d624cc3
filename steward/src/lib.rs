//! Adaptive execution engine for LLM-assisted analysis work.
//!
//! A goal is decomposed into an ordered plan, each step is routed to a code
//! or research executor and a model, and failures trigger replanning of the
//! remaining suffix. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (plan splicing, outcome classification, routing
//!   rules, memory merging, response parsing). No I/O.
//! - **[`io`]**: Side effects (model processes, the sandboxed workspace, the
//!   performance ledger, prompt rendering, human input).
//! - **[`agents`]**: Model-facing roles built on `io` and `core`.
//!
//! [`engine`] ties the roles into one run.

pub mod agents;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod stop;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
