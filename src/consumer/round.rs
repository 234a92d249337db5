//! Per-round negotiation state and the consumer wallet

use crate::error::{MarketError, Result};
use crate::types::{ComponentKind, PricedComponent, Quote, RoundId};
use tokio::time::Instant;

/// Where an outstanding round stands. An idle consumer simply has no round.
#[derive(Clone, Debug, PartialEq)]
pub enum RoundState {
    AwaitingQuotes,
    AwaitingDelivery { accepted: Quote },
}

#[derive(Clone, Debug)]
pub struct ConsumerRound {
    round: RoundId,
    kind: ComponentKind,
    state: RoundState,
    deadline: Instant,
}

impl ConsumerRound {
    pub fn new(round: RoundId, kind: ComponentKind, deadline: Instant) -> Self {
        Self {
            round,
            kind,
            state: RoundState::AwaitingQuotes,
            deadline,
        }
    }

    pub fn round(&self) -> &RoundId {
        &self.round
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// The offer this round committed to, once one was accepted
    pub fn accepted(&self) -> Option<&Quote> {
        match &self.state {
            RoundState::AwaitingDelivery { accepted } => Some(accepted),
            RoundState::AwaitingQuotes => None,
        }
    }

    /// Move to AwaitingDelivery. A round accepts at most once.
    pub fn accept(&mut self, quote: Quote) -> Result<()> {
        if let RoundState::AwaitingDelivery { .. } = self.state {
            return Err(MarketError::MessageRouting(format!(
                "round {} already accepted an offer",
                self.round
            )));
        }

        self.state = RoundState::AwaitingDelivery { accepted: quote };
        Ok(())
    }
}

/// Running balance and everything bought so far
#[derive(Clone, Debug, PartialEq)]
pub struct Wallet {
    balance: f64,
    owned: Vec<PricedComponent>,
}

impl Wallet {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            owned: Vec::new(),
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn owned(&self) -> &[PricedComponent] {
        &self.owned
    }

    pub fn owned_count(&self, kind: ComponentKind) -> usize {
        self.owned.iter().filter(|c| c.kind == kind).count()
    }

    pub fn can_afford(&self, price: f64) -> bool {
        price <= self.balance
    }

    pub fn debit(&mut self, amount: f64) {
        self.balance -= amount;
    }

    pub fn credit(&mut self, amount: f64) {
        self.balance += amount;
    }

    pub fn receive(&mut self, component: PricedComponent) {
        self.owned.push(component);
    }
}
