//! Partsbroker Market Library
//!
//! A broker-mediated marketplace where consumers buy car components from
//! suppliers by message passing only:
//! - The broker fans price requests out to every registered supplier,
//!   aggregates their quotes per consumer round and relays trades
//! - Suppliers quote, fulfil accepted offers and drift their prices
//! - Consumers pick the cheapest quote and pay for it up front

pub mod broker;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod runtime;
pub mod supplier;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use broker::BrokerEngine;
pub use config::{MarketConfig, TRADING_CAPABILITY};
pub use consumer::ConsumerEngine;
pub use error::{MarketError, Result};
pub use runtime::{run_agent, Role};
pub use supplier::SupplierEngine;
pub use transport::{Directory, Envelope, Message, MessageBus, Performative};
pub use types::{AgentId, ComponentKind, PricedComponent, Quote, QuoteSet, RoundId};
