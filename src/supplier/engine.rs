//! Supplier engine: quotes prices, fulfils accepted offers, drifts prices

use crate::config::SupplierConfig;
use crate::error::{MarketError, Result};
use crate::runtime::{settle, unexpected, Role};
use crate::transport::{Envelope, Message};
use crate::types::{AgentId, DeliveryUnit, Decline, Quote, QuoteRequest};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use super::ledger::SupplierLedger;

pub struct SupplierEngine {
    id: AgentId,
    config: SupplierConfig,
    capability: String,
    broker: Option<AgentId>,
    ledger: SupplierLedger,
}

impl SupplierEngine {
    /// `capability` is the broker capability looked up at startup
    pub fn new(id: AgentId, config: SupplierConfig, capability: impl Into<String>) -> Self {
        let ledger = SupplierLedger::from_config(&config);
        Self {
            id,
            config,
            capability: capability.into(),
            broker: None,
            ledger,
        }
    }

    pub fn ledger(&self) -> &SupplierLedger {
        &self.ledger
    }

    pub fn broker(&self) -> Option<&AgentId> {
        self.broker.as_ref()
    }

    /// Pick the first discovered broker and register with it
    pub fn register_with(&mut self, brokers: &[AgentId]) -> Result<Vec<Envelope>> {
        let broker = brokers
            .first()
            .cloned()
            .ok_or_else(|| MarketError::NoBrokerFound(self.capability.clone()))?;

        tracing::info!("{} registering with {}", self.id, broker);
        let env = Envelope::new(self.id.clone(), broker.clone(), &Message::RegisterSupplier)?;
        self.broker = Some(broker);
        Ok(vec![env])
    }

    /// Answer with the current price; stock is untouched
    pub fn handle_quote_request(
        &self,
        broker: &AgentId,
        request: &QuoteRequest,
    ) -> Result<Vec<Envelope>> {
        let price = self.ledger.price(request.kind)?;
        let quote = Quote::answer(request, self.id.clone(), price);

        tracing::debug!(
            "{} quoting {} at {:.2} for {} (round {})",
            self.id,
            request.kind,
            price,
            request.consumer,
            request.round
        );
        Ok(vec![Envelope::new(
            self.id.clone(),
            broker.clone(),
            &Message::PriceQuote(quote),
        )?])
    }

    /// Fulfil an accepted offer, or decline it when sold out
    pub fn handle_accept(&mut self, broker: &AgentId, acceptance: &Quote) -> Result<Vec<Envelope>> {
        if acceptance.supplier != self.id {
            return Err(MarketError::MessageRouting(format!(
                "accept for {} delivered to {}",
                acceptance.supplier, self.id
            )));
        }

        let reply = match self.ledger.fulfil(acceptance.kind, acceptance.price) {
            Ok(component) => {
                tracing::info!(
                    "{} sold {} to {} for {:.2} ({} left, balance {:.2})",
                    self.id,
                    component.kind,
                    acceptance.consumer,
                    component.price,
                    self.ledger.stock(component.kind),
                    self.ledger.balance()
                );
                Message::Deliver(DeliveryUnit {
                    component,
                    source: self.id.clone(),
                    destination: acceptance.consumer.clone(),
                    round: acceptance.round.clone(),
                })
            }
            Err(e @ MarketError::CapacityExceeded(_)) => {
                tracing::warn!("{} declines {}: {}", self.id, acceptance.consumer, e);
                Message::Decline(Decline {
                    supplier: self.id.clone(),
                    consumer: acceptance.consumer.clone(),
                    round: acceptance.round.clone(),
                    kind: acceptance.kind,
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        Ok(vec![Envelope::new(self.id.clone(), broker.clone(), &reply)?])
    }

    /// One tick of the independent price walk
    pub fn price_drift<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.ledger.drift(self.config.max_drift, self.config.band, rng);
        tracing::debug!("{} prices now {:?}", self.id, self.ledger.prices());
    }

    fn dispatch(&mut self, envelope: &Envelope) -> Result<Vec<Envelope>> {
        match envelope.message()? {
            Message::QuoteRequest(request) => self.handle_quote_request(&envelope.sender, &request),
            Message::AcceptOffer(acceptance) => self.handle_accept(&envelope.sender, &acceptance),
            Message::ProtocolViolation(reason) => {
                tracing::warn!("{} told {}: {}", envelope.sender, self.id, reason);
                Ok(Vec::new())
            }
            Message::RegisterSupplier
            | Message::PriceRequest(_)
            | Message::PriceQuote(_)
            | Message::QuoteSet(_)
            | Message::Deliver(_)
            | Message::Decline(_) => unexpected(envelope),
        }
    }
}

impl Role for SupplierEngine {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn discovers(&self) -> Option<&str> {
        Some(&self.capability)
    }

    fn on_start(&mut self, discovered: &[AgentId], _now: Instant) -> Result<Vec<Envelope>> {
        self.register_with(discovered)
    }

    fn handle(&mut self, envelope: &Envelope, _now: Instant, _rng: &mut StdRng) -> Vec<Envelope> {
        let result = self.dispatch(envelope);
        settle(envelope, result)
    }

    fn tick_interval(&self) -> Duration {
        self.config.drift_interval()
    }

    fn on_tick(&mut self, _now: Instant, rng: &mut StdRng) -> Vec<Envelope> {
        self.price_drift(rng);
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TRADING_CAPABILITY;
    use crate::transport::Performative;
    use crate::types::{ComponentKind, RoundId};
    use rand::SeedableRng;

    fn supplier(stock: u32) -> SupplierEngine {
        let mut config = SupplierConfig::default();
        config.initial_stock.insert(ComponentKind::Camshaft, stock);
        SupplierEngine::new(AgentId::new("s1"), config, TRADING_CAPABILITY)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    fn acceptance(price: f64) -> Quote {
        Quote {
            supplier: AgentId::new("s1"),
            price,
            kind: ComponentKind::Camshaft,
            consumer: AgentId::new("c"),
            round: RoundId("r1".to_string()),
        }
    }

    fn from_broker(message: Message) -> Envelope {
        Envelope::new(AgentId::new("broker"), AgentId::new("s1"), &message).unwrap()
    }

    #[test]
    fn test_registers_with_first_broker() {
        let mut s = supplier(10);
        let out = s
            .on_start(&[AgentId::new("b1"), AgentId::new("b2")], Instant::now())
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].receiver, AgentId::new("b1"));
        assert_eq!(out[0].performative, Performative::RegisterSupplier);
        assert_eq!(s.broker(), Some(&AgentId::new("b1")));
    }

    #[test]
    fn test_no_broker_found() {
        let mut s = supplier(10);
        let err = s.on_start(&[], Instant::now()).unwrap_err();
        assert!(matches!(err, MarketError::NoBrokerFound(_)));
    }

    #[test]
    fn test_quote_request_is_a_pure_read() {
        let mut s = supplier(10);
        let request = QuoteRequest {
            kind: ComponentKind::Camshaft,
            consumer: AgentId::new("c"),
            round: RoundId("r1".to_string()),
        };

        let out = s.handle(&from_broker(Message::QuoteRequest(request)), Instant::now(), &mut rng());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].receiver, AgentId::new("broker"));
        match out[0].message().unwrap() {
            Message::PriceQuote(q) => {
                assert_eq!(q.price, 60.0);
                assert_eq!(q.supplier, AgentId::new("s1"));
                assert_eq!(q.consumer, AgentId::new("c"));
                assert_eq!(q.round, RoundId("r1".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.ledger().stock(ComponentKind::Camshaft), 10);
        assert_eq!(s.ledger().balance(), 0.0);
    }

    #[test]
    fn test_stock_decreases_once_per_fulfilment() {
        let mut s = supplier(5);
        for _ in 0..3 {
            let out = s.handle(
                &from_broker(Message::AcceptOffer(acceptance(60.0))),
                Instant::now(),
                &mut rng(),
            );
            assert_eq!(out[0].performative, Performative::Deliver);
        }

        assert_eq!(s.ledger().stock(ComponentKind::Camshaft), 2);
        assert_eq!(s.ledger().balance(), 180.0);
    }

    #[test]
    fn test_delivery_addressed_to_consumer() {
        let mut s = supplier(1);
        let out = s.handle(
            &from_broker(Message::AcceptOffer(acceptance(72.5))),
            Instant::now(),
            &mut rng(),
        );

        match out[0].message().unwrap() {
            Message::Deliver(unit) => {
                assert_eq!(unit.destination, AgentId::new("c"));
                assert_eq!(unit.source, AgentId::new("s1"));
                assert_eq!(unit.component.price, 72.5);
                assert_eq!(unit.round, RoundId("r1".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sold_out_declines_without_booking() {
        let mut s = supplier(0);
        let out = s.handle(
            &from_broker(Message::AcceptOffer(acceptance(60.0))),
            Instant::now(),
            &mut rng(),
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].receiver, AgentId::new("broker"));
        match out[0].message().unwrap() {
            Message::Decline(decline) => {
                assert_eq!(decline.consumer, AgentId::new("c"));
                assert_eq!(decline.kind, ComponentKind::Camshaft);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.ledger().stock(ComponentKind::Camshaft), 0);
        assert_eq!(s.ledger().balance(), 0.0);
    }

    #[test]
    fn test_misrouted_accept_is_dropped() {
        let mut s = supplier(5);
        let mut other = acceptance(60.0);
        other.supplier = AgentId::new("s2");

        let out = s.handle(&from_broker(Message::AcceptOffer(other)), Instant::now(), &mut rng());

        assert!(out.is_empty());
        assert_eq!(s.ledger().stock(ComponentKind::Camshaft), 5);
    }

    #[test]
    fn test_negative_accept_price_is_rejected() {
        let mut s = supplier(5);
        let out = s.handle(
            &from_broker(Message::AcceptOffer(acceptance(-500.0))),
            Instant::now(),
            &mut rng(),
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].receiver, AgentId::new("broker"));
        assert_eq!(out[0].performative, Performative::ProtocolViolation);
        assert_eq!(s.ledger().stock(ComponentKind::Camshaft), 5);
        assert_eq!(s.ledger().balance(), 0.0);
    }

    #[test]
    fn test_unknown_tag_yields_violation() {
        let mut s = supplier(5);
        let out = s.handle(&from_broker(Message::RegisterSupplier), Instant::now(), &mut rng());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].receiver, AgentId::new("broker"));
        assert_eq!(out[0].performative, Performative::ProtocolViolation);
        assert_eq!(s.ledger().stock(ComponentKind::Camshaft), 5);
    }

    #[test]
    fn test_tick_drifts_prices_within_band() {
        let mut s = supplier(5);
        let mut rng = rng();
        for _ in 0..50 {
            assert!(s.on_tick(Instant::now(), &mut rng).is_empty());
        }

        let p = s.ledger().price(ComponentKind::Camshaft).unwrap();
        assert!((30.0..=90.0).contains(&p));
    }
}
