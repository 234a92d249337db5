//! Broker role: quote aggregation and trade relay

pub mod aggregation;
pub mod engine;

pub use aggregation::{AggregationEntry, AggregationTable, RoundKey};
pub use engine::BrokerEngine;
