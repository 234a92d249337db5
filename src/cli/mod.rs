//! CLI module for Partsbroker

pub mod app;
pub mod commands;

pub use app::{ConsumerReport, MarketApp, MarketReport, SupplierReport};
pub use commands::{Cli, Commands};
