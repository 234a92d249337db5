//! Consumer engine: request cadence, offer selection, wallet

use crate::config::ConsumerConfig;
use crate::error::{MarketError, Result};
use crate::runtime::{settle, unexpected, Role};
use crate::transport::{Envelope, Message};
use crate::types::{AgentId, Decline, DeliveryUnit, PriceRequest, Quote, QuoteSet, RoundId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use super::round::{ConsumerRound, Wallet};

/// Paid rounds remembered after their deadline, oldest dropped first
const LATE_DELIVERY_CAPACITY: usize = 64;

pub struct ConsumerEngine {
    id: AgentId,
    config: ConsumerConfig,
    capability: String,
    broker: Option<AgentId>,
    wallet: Wallet,
    rounds: HashMap<RoundId, ConsumerRound>,
    /// Expired rounds that were already paid for
    late: VecDeque<Quote>,
    sequence: u64,
    next_request_at: Option<Instant>,
}

impl ConsumerEngine {
    pub fn new(id: AgentId, config: ConsumerConfig, capability: impl Into<String>) -> Self {
        let wallet = Wallet::new(config.initial_balance);
        Self {
            id,
            config,
            capability: capability.into(),
            broker: None,
            wallet,
            rounds: HashMap::new(),
            late: VecDeque::new(),
            sequence: 0,
            next_request_at: None,
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn broker(&self) -> Option<&AgentId> {
        self.broker.as_ref()
    }

    pub fn round(&self, round: &RoundId) -> Option<&ConsumerRound> {
        self.rounds.get(round)
    }

    /// Number of rounds awaiting quotes or delivery
    pub fn outstanding(&self) -> usize {
        self.rounds.len()
    }

    /// Paid rounds past their deadline that still accept a delivery
    pub fn awaiting_late_delivery(&self) -> usize {
        self.late.len()
    }

    /// Attach to the first discovered broker; the first request goes out one
    /// interval after `now`
    pub fn attach(&mut self, brokers: &[AgentId], now: Instant) -> Result<()> {
        let broker = brokers
            .first()
            .cloned()
            .ok_or_else(|| MarketError::NoBrokerFound(self.capability.clone()))?;

        tracing::info!("{} trading through {}", self.id, broker);
        self.broker = Some(broker);
        self.next_request_at = Some(now + self.config.request_interval());
        Ok(())
    }

    /// Open a round for a random buyable kind and ask the broker for quotes.
    ///
    /// Does nothing while `max_outstanding_rounds` rounds are still open.
    pub fn request_price<R: Rng + ?Sized>(
        &mut self,
        now: Instant,
        rng: &mut R,
    ) -> Result<Vec<Envelope>> {
        if self.rounds.len() >= self.config.max_outstanding_rounds {
            tracing::debug!(
                "{} skipping request: {} rounds outstanding",
                self.id,
                self.rounds.len()
            );
            return Ok(Vec::new());
        }

        let broker = self
            .broker
            .clone()
            .ok_or_else(|| MarketError::NoBrokerFound(self.capability.clone()))?;
        let kind = self
            .config
            .buyable
            .choose(rng)
            .copied()
            .ok_or_else(|| MarketError::InvalidConfig("no buyable kinds".to_string()))?;

        self.sequence += 1;
        let round = RoundId::derive(&self.id, self.sequence);
        let request = PriceRequest {
            kind,
            round: round.clone(),
        };
        let env = Envelope::new(self.id.clone(), broker, &Message::PriceRequest(request))?;

        tracing::info!("{} asking for {} (round {})", self.id, kind, round);
        self.rounds.insert(
            round.clone(),
            ConsumerRound::new(round, kind, now + self.config.round_timeout()),
        );
        Ok(vec![env])
    }

    /// Accept the cheapest quote of the round, debiting its price up front.
    ///
    /// Only sets from the attached broker are considered. An empty set or an
    /// unaffordable winner closes the round without an accept.
    pub fn handle_quote_set(&mut self, sender: &AgentId, set: &QuoteSet) -> Result<Vec<Envelope>> {
        let broker = match &self.broker {
            Some(broker) if broker == sender => broker.clone(),
            _ => {
                return Err(MarketError::MessageRouting(format!(
                    "quote set for round {} from {}, not the broker",
                    set.round, sender
                )))
            }
        };
        let round = self
            .rounds
            .get_mut(&set.round)
            .ok_or_else(|| MarketError::RoundNotFound(set.round.to_string()))?;
        if round.accepted().is_some() {
            return Err(MarketError::MessageRouting(format!(
                "second quote set for round {}",
                set.round
            )));
        }
        let kind = round.kind();
        if set.kind != kind || set.quotes.iter().any(|q| q.kind != kind) {
            return Err(MarketError::MessageRouting(format!(
                "quote set for round {} does not match {}",
                set.round, kind
            )));
        }

        let Some(best) = set.cheapest().cloned() else {
            self.rounds.remove(&set.round);
            return Err(MarketError::EmptyQuoteSet(set.round.to_string()));
        };

        if self.config.enforce_balance_floor && !self.wallet.can_afford(best.price) {
            self.rounds.remove(&set.round);
            return Err(MarketError::InsufficientBalance {
                required: best.price,
                available: self.wallet.balance(),
            });
        }

        let acceptance = Quote {
            consumer: self.id.clone(),
            ..best
        };
        let env = Envelope::new(
            self.id.clone(),
            broker,
            &Message::AcceptOffer(acceptance.clone()),
        )?;
        round.accept(acceptance.clone())?;
        self.wallet.debit(acceptance.price);

        tracing::info!(
            "{} accepting {} from {} at {:.2} (best of {}{}, balance {:.2})",
            self.id,
            acceptance.kind,
            acceptance.supplier,
            acceptance.price,
            set.quotes.len(),
            if set.complete { "" } else { ", partial" },
            self.wallet.balance()
        );
        Ok(vec![env])
    }

    /// Take ownership of a delivered component and close its round.
    ///
    /// Paid rounds that already expired still take their delivery.
    pub fn handle_delivery(&mut self, unit: &DeliveryUnit) -> Result<()> {
        if unit.destination != self.id {
            return Err(MarketError::MessageRouting(format!(
                "delivery for {} reached {}",
                unit.destination, self.id
            )));
        }
        let accepted = self.paid_for(&unit.round)?;
        if accepted.supplier != unit.source {
            return Err(MarketError::MessageRouting(format!(
                "delivery from {} but round {} accepted {}",
                unit.source, unit.round, accepted.supplier
            )));
        }

        self.close_paid(&unit.round);
        self.wallet.receive(unit.component.clone());
        tracing::info!(
            "{} received {} from {} ({} owned, balance {:.2})",
            self.id,
            unit.component.kind,
            unit.source,
            self.wallet.owned().len(),
            self.wallet.balance()
        );
        Ok(())
    }

    /// Refund the accepted price and close the round
    pub fn handle_decline(&mut self, decline: &Decline) -> Result<()> {
        let accepted = self.paid_for(&decline.round)?;
        if accepted.supplier != decline.supplier {
            return Err(MarketError::MessageRouting(format!(
                "decline from {} but round {} accepted {}",
                decline.supplier, decline.round, accepted.supplier
            )));
        }

        self.close_paid(&decline.round);
        self.wallet.credit(accepted.price);
        tracing::warn!(
            "{} refunded {:.2} after {} declined: {}",
            self.id,
            accepted.price,
            decline.supplier,
            decline.reason
        );
        Ok(())
    }

    /// Fail every round past its deadline.
    ///
    /// Paid rounds stay debited and move to the late-delivery list.
    pub fn expire_rounds(&mut self, now: Instant) -> Vec<RoundId> {
        let expired: Vec<RoundId> = self
            .rounds
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.round().clone())
            .collect();

        for id in &expired {
            let Some(round) = self.rounds.remove(id) else {
                continue;
            };
            match round.accepted() {
                Some(accepted) => {
                    tracing::warn!(
                        "{} round {} expired awaiting {} from {} ({:.2} paid)",
                        self.id,
                        id,
                        round.kind(),
                        accepted.supplier,
                        accepted.price
                    );
                    if self.late.len() == LATE_DELIVERY_CAPACITY {
                        if let Some(dropped) = self.late.pop_front() {
                            tracing::warn!(
                                "{} gave up on round {} ({:.2} paid)",
                                self.id,
                                dropped.round,
                                dropped.price
                            );
                        }
                    }
                    self.late.push_back(accepted.clone());
                }
                None => tracing::warn!(
                    "{} round {} expired without quotes for {}",
                    self.id,
                    id,
                    round.kind()
                ),
            }
        }
        expired
    }

    /// The accepted offer of a paid round, open or expired
    fn paid_for(&self, round: &RoundId) -> Result<Quote> {
        if let Some(open) = self.rounds.get(round) {
            return open.accepted().cloned().ok_or_else(|| {
                MarketError::MessageRouting(format!("round {} has no accepted offer", round))
            });
        }
        self.late
            .iter()
            .find(|q| &q.round == round)
            .cloned()
            .ok_or_else(|| MarketError::RoundNotFound(round.to_string()))
    }

    fn close_paid(&mut self, round: &RoundId) {
        if self.rounds.remove(round).is_none() {
            self.late.retain(|q| &q.round != round);
        }
    }

    fn dispatch(&mut self, envelope: &Envelope) -> Result<Vec<Envelope>> {
        match envelope.message()? {
            Message::QuoteSet(set) => match self.handle_quote_set(&envelope.sender, &set) {
                Err(e @ (MarketError::EmptyQuoteSet(_) | MarketError::InsufficientBalance { .. })) => {
                    tracing::warn!("{} abandoned round {}: {}", self.id, set.round, e);
                    Ok(Vec::new())
                }
                other => other,
            },
            Message::Deliver(unit) => self.handle_delivery(&unit).map(|_| Vec::new()),
            Message::Decline(decline) => self.handle_decline(&decline).map(|_| Vec::new()),
            Message::ProtocolViolation(reason) => {
                tracing::warn!("{} told {}: {}", envelope.sender, self.id, reason);
                Ok(Vec::new())
            }
            Message::RegisterSupplier
            | Message::PriceRequest(_)
            | Message::QuoteRequest(_)
            | Message::PriceQuote(_)
            | Message::AcceptOffer(_) => unexpected(envelope),
        }
    }
}

impl Role for ConsumerEngine {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn discovers(&self) -> Option<&str> {
        Some(&self.capability)
    }

    fn on_start(&mut self, discovered: &[AgentId], now: Instant) -> Result<Vec<Envelope>> {
        self.attach(discovered, now)?;
        Ok(Vec::new())
    }

    fn handle(&mut self, envelope: &Envelope, _now: Instant, _rng: &mut StdRng) -> Vec<Envelope> {
        let result = self.dispatch(envelope);
        settle(envelope, result)
    }

    fn tick_interval(&self) -> Duration {
        self.config.sweep_interval()
    }

    fn on_tick(&mut self, now: Instant, rng: &mut StdRng) -> Vec<Envelope> {
        self.expire_rounds(now);

        match self.next_request_at {
            Some(due) if now >= due => {
                self.next_request_at = Some(now + self.config.request_interval());
                self.request_price(now, rng).unwrap_or_else(|e| {
                    tracing::error!("{} failed to request a price: {}", self.id, e);
                    Vec::new()
                })
            }
            _ => Vec::new(),
        }
    }
}
