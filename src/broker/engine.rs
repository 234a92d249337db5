//! Broker engine: fans price requests out, aggregates quotes, relays trades

use crate::config::BrokerConfig;
use crate::error::{MarketError, Result};
use crate::runtime::{settle, unexpected, Role};
use crate::transport::{Envelope, Message};
use crate::types::{AgentId, DeliveryUnit, Decline, PriceRequest, Quote, QuoteRequest, QuoteSet};
use rand::rngs::StdRng;
use std::time::Duration;
use tokio::time::Instant;

use super::aggregation::{AggregationEntry, AggregationTable, RoundKey};

/// Routes and aggregates; never prices anything itself
pub struct BrokerEngine {
    id: AgentId,
    config: BrokerConfig,
    suppliers: Vec<AgentId>,
    aggregations: AggregationTable,
}

impl BrokerEngine {
    pub fn new(id: AgentId, config: BrokerConfig) -> Self {
        Self {
            id,
            config,
            suppliers: Vec::new(),
            aggregations: AggregationTable::new(),
        }
    }

    pub fn suppliers(&self) -> &[AgentId] {
        &self.suppliers
    }

    pub fn aggregations(&self) -> &AggregationTable {
        &self.aggregations
    }

    /// Add a supplier to the fan-out set. Returns false if it was already known.
    pub fn register_supplier(&mut self, supplier: AgentId) -> bool {
        if self.suppliers.contains(&supplier) {
            tracing::debug!("{} re-registered with {}", supplier, self.id);
            return false;
        }

        tracing::info!(
            "{} registered supplier {} ({} known)",
            self.id,
            supplier,
            self.suppliers.len() + 1
        );
        self.suppliers.push(supplier);
        true
    }

    /// Open an aggregation entry for the round and ask every known supplier
    pub fn request_quotes(
        &mut self,
        consumer: AgentId,
        request: PriceRequest,
        now: Instant,
    ) -> Result<Vec<Envelope>> {
        if self.suppliers.is_empty() {
            tracing::warn!(
                "{} has no suppliers; ignoring {} request from {}",
                self.id,
                request.kind,
                consumer
            );
            return Ok(Vec::new());
        }

        let fan_out = QuoteRequest {
            kind: request.kind,
            consumer: consumer.clone(),
            round: request.round.clone(),
        };
        let message = Message::QuoteRequest(fan_out);
        let outbound = self
            .suppliers
            .iter()
            .map(|supplier| Envelope::new(self.id.clone(), supplier.clone(), &message))
            .collect::<Result<Vec<_>>>()?;

        let key = RoundKey {
            consumer: consumer.clone(),
            round: request.round.clone(),
        };
        let entry = AggregationEntry::new(
            key,
            request.kind,
            self.suppliers.clone(),
            now + self.config.aggregation_timeout(),
        );
        if self.aggregations.open(entry).is_some() {
            tracing::warn!("{} restarted round {} for {}", self.id, request.round, consumer);
        }

        tracing::info!(
            "{} asked {} suppliers to quote {} for {} (round {})",
            self.id,
            outbound.len(),
            request.kind,
            consumer,
            request.round
        );
        Ok(outbound)
    }

    /// Record one supplier quote; forward the set once it is complete
    pub fn receive_quote(&mut self, quote: Quote) -> Result<Vec<Envelope>> {
        let supplier = quote.supplier.clone();
        let round = quote.round.clone();

        match self.aggregations.record(quote)? {
            Some((consumer, set)) => {
                tracing::info!(
                    "{} forwarding {} quotes to {} (round {})",
                    self.id,
                    set.quotes.len(),
                    consumer,
                    set.round
                );
                self.forward(consumer, set).map(|env| vec![env])
            }
            None => {
                tracing::debug!("{} got quote from {} for round {}", self.id, supplier, round);
                Ok(Vec::new())
            }
        }
    }

    /// Forward an acceptance to the chosen supplier, payload untouched
    pub fn relay_accept(&self, envelope: &Envelope, acceptance: &Quote) -> Vec<Envelope> {
        tracing::info!(
            "{} relaying accept of {} at {:.2} from {} to {}",
            self.id,
            acceptance.kind,
            acceptance.price,
            envelope.sender,
            acceptance.supplier
        );
        vec![envelope.reroute(self.id.clone(), acceptance.supplier.clone())]
    }

    /// Forward a delivery to the consumer it is addressed to
    pub fn relay_delivery(&self, envelope: &Envelope, unit: &DeliveryUnit) -> Vec<Envelope> {
        tracing::info!(
            "{} relaying {} from {} to {}",
            self.id,
            unit.component.kind,
            unit.source,
            unit.destination
        );
        vec![envelope.reroute(self.id.clone(), unit.destination.clone())]
    }

    /// Forward a supplier's decline to the consumer that accepted
    pub fn relay_decline(&self, envelope: &Envelope, decline: &Decline) -> Vec<Envelope> {
        tracing::info!(
            "{} relaying decline of {} from {} to {}: {}",
            self.id,
            decline.kind,
            decline.supplier,
            decline.consumer,
            decline.reason
        );
        vec![envelope.reroute(self.id.clone(), decline.consumer.clone())]
    }

    /// Close every round past its deadline, forwarding what arrived
    pub fn expire_rounds(&mut self, now: Instant) -> Result<Vec<Envelope>> {
        self.aggregations
            .expire(now)
            .into_iter()
            .map(|(consumer, set)| {
                tracing::warn!(
                    "{} round {} for {} timed out with {} quotes",
                    self.id,
                    set.round,
                    consumer,
                    set.quotes.len()
                );
                self.forward(consumer, set)
            })
            .collect()
    }

    fn forward(&self, consumer: AgentId, set: QuoteSet) -> Result<Envelope> {
        Envelope::new(self.id.clone(), consumer, &Message::QuoteSet(set))
    }

    fn dispatch(&mut self, envelope: &Envelope, now: Instant) -> Result<Vec<Envelope>> {
        match envelope.message()? {
            Message::RegisterSupplier => {
                self.register_supplier(envelope.sender.clone());
                Ok(Vec::new())
            }
            Message::PriceRequest(request) => {
                self.request_quotes(envelope.sender.clone(), request, now)
            }
            Message::PriceQuote(quote) => {
                if quote.supplier != envelope.sender {
                    return Err(MarketError::MessageRouting(format!(
                        "{} sent a quote on behalf of {}",
                        envelope.sender, quote.supplier
                    )));
                }
                self.receive_quote(quote)
            }
            Message::AcceptOffer(acceptance) => Ok(self.relay_accept(envelope, &acceptance)),
            Message::Deliver(unit) => Ok(self.relay_delivery(envelope, &unit)),
            Message::Decline(decline) => Ok(self.relay_decline(envelope, &decline)),
            Message::ProtocolViolation(reason) => {
                tracing::warn!("{} told {}: {}", envelope.sender, self.id, reason);
                Ok(Vec::new())
            }
            Message::QuoteRequest(_) | Message::QuoteSet(_) => unexpected(envelope),
        }
    }
}

impl Role for BrokerEngine {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn advertises(&self) -> Option<&str> {
        Some(&self.config.capability)
    }

    fn handle(&mut self, envelope: &Envelope, now: Instant, _rng: &mut StdRng) -> Vec<Envelope> {
        let result = self.dispatch(envelope, now);
        settle(envelope, result)
    }

    fn tick_interval(&self) -> Duration {
        self.config.sweep_interval()
    }

    fn on_tick(&mut self, now: Instant, _rng: &mut StdRng) -> Vec<Envelope> {
        self.expire_rounds(now).unwrap_or_else(|e| {
            tracing::error!("{} failed to expire rounds: {}", self.id, e);
            Vec::new()
        })
    }
}
