//! Hosting runtime for market roles

pub mod agent;

pub use agent::{run_agent, settle, unexpected, Role};
