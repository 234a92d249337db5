//! Market configuration

use crate::error::{MarketError, Result};
use crate::types::ComponentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Capability brokers advertise in the directory
pub const TRADING_CAPABILITY: &str = "car-components-trading-brokership";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub broker: BrokerConfig,
    pub supplier: SupplierConfig,
    pub consumer: ConsumerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub capability: String,
    /// How long an aggregation entry waits for missing quotes
    pub aggregation_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplierConfig {
    pub initial_stock: BTreeMap<ComponentKind, u32>,
    pub reference_prices: BTreeMap<ComponentKind, f64>,
    pub drift_interval_ms: u64,
    /// Upper bound (exclusive) of the per-tick relative price move
    pub max_drift: f64,
    /// Prices stay within reference * (1 ± band)
    pub band: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub initial_balance: f64,
    pub buyable: Vec<ComponentKind>,
    pub request_interval_ms: u64,
    pub round_timeout_ms: u64,
    /// How often outstanding rounds are checked against their deadline
    pub sweep_interval_ms: u64,
    pub max_outstanding_rounds: usize,
    /// Refuse purchases the wallet cannot cover
    pub enforce_balance_floor: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capability: TRADING_CAPABILITY.to_string(),
            aggregation_timeout_ms: 3_000,
            sweep_interval_ms: 250,
        }
    }
}

impl Default for SupplierConfig {
    fn default() -> Self {
        Self {
            initial_stock: ComponentKind::ALL.iter().map(|k| (*k, 100)).collect(),
            reference_prices: BTreeMap::from([
                (ComponentKind::Camshaft, 60.0),
                (ComponentKind::ClutchPlate, 80.0),
                (ComponentKind::Alternator, 250.0),
            ]),
            drift_interval_ms: 5_000,
            max_drift: 0.2,
            band: 0.5,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            buyable: ComponentKind::ALL.to_vec(),
            request_interval_ms: 10_000,
            round_timeout_ms: 8_000,
            sweep_interval_ms: 250,
            max_outstanding_rounds: 1,
            enforce_balance_floor: true,
        }
    }
}

impl BrokerConfig {
    pub fn aggregation_timeout(&self) -> Duration {
        Duration::from_millis(self.aggregation_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl SupplierConfig {
    pub fn drift_interval(&self) -> Duration {
        Duration::from_millis(self.drift_interval_ms)
    }
}

impl ConsumerConfig {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl MarketConfig {
    /// Load a JSON configuration file. Missing sections fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MarketError::Configuration(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: MarketConfig = serde_json::from_str(&raw)
            .map_err(|e| MarketError::Configuration(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| MarketError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let broker = &self.broker;
        if broker.capability.is_empty() {
            return Err(MarketError::InvalidConfig(
                "broker.capability cannot be empty".to_string(),
            ));
        }
        if broker.aggregation_timeout_ms == 0 || broker.sweep_interval_ms == 0 {
            return Err(MarketError::InvalidConfig(
                "broker timeouts must be positive".to_string(),
            ));
        }

        let supplier = &self.supplier;
        if supplier.drift_interval_ms == 0 {
            return Err(MarketError::InvalidConfig(
                "supplier.drift_interval_ms must be positive".to_string(),
            ));
        }
        if !(supplier.max_drift > 0.0 && supplier.max_drift < 1.0) {
            return Err(MarketError::InvalidConfig(format!(
                "supplier.max_drift must be in (0, 1), got {}",
                supplier.max_drift
            )));
        }
        if !(supplier.band > 0.0 && supplier.band < 1.0) {
            return Err(MarketError::InvalidConfig(format!(
                "supplier.band must be in (0, 1), got {}",
                supplier.band
            )));
        }
        for kind in ComponentKind::ALL {
            match supplier.reference_prices.get(&kind) {
                Some(price) if price.is_finite() && *price >= 0.0 => {}
                Some(price) => {
                    return Err(MarketError::InvalidConfig(format!(
                        "reference price for {} must be a non-negative number, got {}",
                        kind, price
                    )))
                }
                None => {
                    return Err(MarketError::InvalidConfig(format!(
                        "missing reference price for {}",
                        kind
                    )))
                }
            }
        }

        let consumer = &self.consumer;
        if !consumer.initial_balance.is_finite() || consumer.initial_balance < 0.0 {
            return Err(MarketError::InvalidConfig(
                "consumer.initial_balance must be a non-negative number".to_string(),
            ));
        }
        if consumer.buyable.is_empty() {
            return Err(MarketError::InvalidConfig(
                "consumer.buyable cannot be empty".to_string(),
            ));
        }
        if consumer.request_interval_ms == 0
            || consumer.round_timeout_ms == 0
            || consumer.sweep_interval_ms == 0
        {
            return Err(MarketError::InvalidConfig(
                "consumer intervals must be positive".to_string(),
            ));
        }
        if consumer.max_outstanding_rounds == 0 {
            return Err(MarketError::InvalidConfig(
                "consumer.max_outstanding_rounds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
