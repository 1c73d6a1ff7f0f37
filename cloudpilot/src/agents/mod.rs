//! Model-backed components that advance a plan.
//!
//! Both agents take the conversation by reference and return a new state, so
//! a failed model call leaves the caller's state untouched.

pub mod planner;
pub mod step_executor;
