//! Supplier stock, prices and balance

use crate::config::SupplierConfig;
use crate::error::{MarketError, Result};
use crate::types::{ComponentKind, PricedComponent};
use rand::Rng;
use std::collections::BTreeMap;

/// One step of the bounded random walk around `reference`.
///
/// Moves `current` up or down by a uniform fraction in `[0, max_drift)` of
/// itself, then clamps into `[reference * (1 - band), reference * (1 + band)]`.
pub fn drift_price<R: Rng + ?Sized>(
    current: f64,
    reference: f64,
    max_drift: f64,
    band: f64,
    rng: &mut R,
) -> f64 {
    let sign = if rng.gen_bool(0.5) { -1.0 } else { 1.0 };
    let fraction = rng.gen_range(0.0..max_drift);
    let next = current + sign * fraction * current;

    next.clamp(reference * (1.0 - band), reference * (1.0 + band))
}

#[derive(Clone, Debug)]
pub struct SupplierLedger {
    stock: BTreeMap<ComponentKind, u32>,
    prices: BTreeMap<ComponentKind, f64>,
    reference: BTreeMap<ComponentKind, f64>,
    balance: f64,
}

impl SupplierLedger {
    /// Start at the reference prices with the configured stock
    pub fn from_config(config: &SupplierConfig) -> Self {
        Self {
            stock: config.initial_stock.clone(),
            prices: config.reference_prices.clone(),
            reference: config.reference_prices.clone(),
            balance: 0.0,
        }
    }

    pub fn price(&self, kind: ComponentKind) -> Result<f64> {
        self.prices
            .get(&kind)
            .copied()
            .ok_or(MarketError::UnknownComponent(kind))
    }

    pub fn reference_price(&self, kind: ComponentKind) -> Option<f64> {
        self.reference.get(&kind).copied()
    }

    pub fn stock(&self, kind: ComponentKind) -> u32 {
        self.stock.get(&kind).copied().unwrap_or(0)
    }

    pub fn stock_levels(&self) -> &BTreeMap<ComponentKind, u32> {
        &self.stock
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn prices(&self) -> &BTreeMap<ComponentKind, f64> {
        &self.prices
    }

    /// Take one unit out of stock and book the sale.
    ///
    /// Fails with `CapacityExceeded` when the kind is sold out and with
    /// `ProtocolViolation` for a negative or non-finite price; nothing is
    /// booked in either case.
    pub fn fulfil(&mut self, kind: ComponentKind, price: f64) -> Result<PricedComponent> {
        if !price.is_finite() || price < 0.0 {
            return Err(MarketError::ProtocolViolation(format!(
                "cannot sell {} at {}",
                kind, price
            )));
        }

        let remaining = self.stock.entry(kind).or_insert(0);
        if *remaining == 0 {
            return Err(MarketError::CapacityExceeded(kind));
        }

        *remaining -= 1;
        self.balance += price;
        Ok(PricedComponent { kind, price })
    }

    /// Apply one drift step to every priced kind
    pub fn drift<R: Rng + ?Sized>(&mut self, max_drift: f64, band: f64, rng: &mut R) {
        for (kind, price) in self.prices.iter_mut() {
            if let Some(reference) = self.reference.get(kind) {
                *price = drift_price(*price, *reference, max_drift, band, rng);
            }
        }
    }
}
