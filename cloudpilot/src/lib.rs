//! Conversational agent that turns natural-language requests into cloud CLI
//! invocations (`gcloud`, `gsutil`, `bq`, `kubectl`), runs them behind a
//! command gate, and relays the results.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (command gate, policy, plan
//!   parsing, routing, conversation types). No I/O.
//! - **[`io`]**: Side effects (config files, child processes, model adapter,
//!   prompt rendering). Isolated behind traits to enable scripted tests.
//! - **[`agents`]** and **[`tools`]**: Components the router dispatches to.
//!
//! [`turn`] drives a single turn by repeatedly asking [`core::router`] what
//! runs next.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod turn;
