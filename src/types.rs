//! Core types exchanged between consumers, the broker and suppliers

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressable identity of a market participant
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token for one consumer negotiation round
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundId(pub String);

impl RoundId {
    /// Derive a fresh round ID from the consumer, its round counter and a random salt
    pub fn derive(consumer: &AgentId, sequence: u64) -> Self {
        use rand::RngCore;
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut hasher = Blake2b512::new();
        hasher.update(consumer.0.as_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(salt);
        let result = hasher.finalize();
        Self(format!("r_{}", hex::encode(&result[..8])))
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tradable component kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKind {
    Alternator,
    Camshaft,
    ClutchPlate,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 3] = [
        ComponentKind::Alternator,
        ComponentKind::Camshaft,
        ComponentKind::ClutchPlate,
    ];
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Alternator => "ALTERNATOR",
            ComponentKind::Camshaft => "CAMSHAFT",
            ComponentKind::ClutchPlate => "CLUTCH_PLATE",
        };
        f.write_str(name)
    }
}

/// A component together with the price it was sold at
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricedComponent {
    pub kind: ComponentKind,
    pub price: f64,
}

/// Consumer → broker: ask for quotes on one kind
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub kind: ComponentKind,
    pub round: RoundId,
}

/// Broker → supplier: fan-out leg of a price request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub kind: ComponentKind,
    pub consumer: AgentId,
    pub round: RoundId,
}

/// A supplier's price for one kind, addressed to the requesting consumer.
///
/// The same shape is used for the consumer's acceptance, which names the
/// winning supplier and price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub supplier: AgentId,
    pub price: f64,
    pub kind: ComponentKind,
    pub consumer: AgentId,
    pub round: RoundId,
}

impl Quote {
    /// Answer a quote request at the given price
    pub fn answer(request: &QuoteRequest, supplier: AgentId, price: f64) -> Self {
        Self {
            supplier,
            price,
            kind: request.kind,
            consumer: request.consumer.clone(),
            round: request.round.clone(),
        }
    }
}

/// Broker → consumer: quotes gathered for one round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteSet {
    pub round: RoundId,
    pub kind: ComponentKind,
    pub quotes: Vec<Quote>,
    /// False when the broker gave up waiting and forwarded a partial set
    pub complete: bool,
}

impl QuoteSet {
    /// Cheapest quote; ties go to the earliest arrival
    pub fn cheapest(&self) -> Option<&Quote> {
        self.quotes.iter().fold(None, |best: Option<&Quote>, q| match best {
            Some(b) if b.price <= q.price => Some(b),
            _ => Some(q),
        })
    }
}

/// A fulfilled component on its way to the buying consumer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryUnit {
    pub component: PricedComponent,
    pub source: AgentId,
    pub destination: AgentId,
    pub round: RoundId,
}

/// Supplier refusal of an accepted offer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decline {
    pub supplier: AgentId,
    pub consumer: AgentId,
    pub round: RoundId,
    pub kind: ComponentKind,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(supplier: &str, price: f64) -> Quote {
        Quote {
            supplier: AgentId::new(supplier),
            price,
            kind: ComponentKind::Camshaft,
            consumer: AgentId::new("consumer-0"),
            round: RoundId("r_test".to_string()),
        }
    }

    #[test]
    fn test_round_id_derivation() {
        let consumer = AgentId::new("consumer-0");

        let r1 = RoundId::derive(&consumer, 1);
        let r2 = RoundId::derive(&consumer, 1);

        assert!(r1.0.starts_with("r_"));
        assert_eq!(r1.0.len(), 2 + 16);
        // Salted, so the same sequence never collides
        assert_ne!(r1, r2);
    }

    #[test]
    fn test_component_kind_wire_name() {
        let json = serde_json::to_string(&ComponentKind::ClutchPlate).unwrap();
        assert_eq!(json, "\"CLUTCH_PLATE\"");
        assert_eq!(ComponentKind::ClutchPlate.to_string(), "CLUTCH_PLATE");
    }

    #[test]
    fn test_cheapest_picks_minimum() {
        let set = QuoteSet {
            round: RoundId("r_test".to_string()),
            kind: ComponentKind::Camshaft,
            quotes: vec![quote("s1", 100.0), quote("s2", 80.0), quote("s3", 95.0)],
            complete: true,
        };

        let best = set.cheapest().unwrap();
        assert_eq!(best.supplier, AgentId::new("s2"));
        assert_eq!(best.price, 80.0);
    }

    #[test]
    fn test_cheapest_tie_goes_to_first_arrival() {
        let set = QuoteSet {
            round: RoundId("r_test".to_string()),
            kind: ComponentKind::Camshaft,
            quotes: vec![quote("s1", 90.0), quote("s2", 70.0), quote("s3", 70.0)],
            complete: true,
        };

        assert_eq!(set.cheapest().unwrap().supplier, AgentId::new("s2"));
    }

    #[test]
    fn test_cheapest_of_empty_set() {
        let set = QuoteSet {
            round: RoundId("r_test".to_string()),
            kind: ComponentKind::Alternator,
            quotes: vec![],
            complete: false,
        };

        assert!(set.cheapest().is_none());
    }

    #[test]
    fn test_answer_copies_correlation() {
        let request = QuoteRequest {
            kind: ComponentKind::Alternator,
            consumer: AgentId::new("consumer-3"),
            round: RoundId("r_abc".to_string()),
        };

        let q = Quote::answer(&request, AgentId::new("supplier-1"), 240.0);
        assert_eq!(q.consumer, request.consumer);
        assert_eq!(q.round, request.round);
        assert_eq!(q.kind, ComponentKind::Alternator);
    }
}
