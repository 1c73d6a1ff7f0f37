//! Side-effecting helpers: configuration files, child processes, the model
//! adapter and prompt rendering.

pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
