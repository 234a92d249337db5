//! Message envelope and payload codec

use crate::error::{MarketError, Result};
use crate::types::{AgentId, DeliveryUnit, Decline, PriceRequest, Quote, QuoteRequest, QuoteSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role tag carried in every envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Performative {
    RegisterSupplier,
    PriceRequest,
    QuoteRequest,
    PriceQuote,
    QuoteSet,
    AcceptOffer,
    Deliver,
    Decline,
    ProtocolViolation,
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Performative::RegisterSupplier => "register-supplier",
            Performative::PriceRequest => "price-request",
            Performative::QuoteRequest => "quote-request",
            Performative::PriceQuote => "price-quote",
            Performative::QuoteSet => "quote-set",
            Performative::AcceptOffer => "accept-offer",
            Performative::Deliver => "deliver",
            Performative::Decline => "decline",
            Performative::ProtocolViolation => "protocol-violation",
        };
        f.write_str(tag)
    }
}

/// Decoded message: one payload type per performative
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    RegisterSupplier,
    PriceRequest(PriceRequest),
    QuoteRequest(QuoteRequest),
    PriceQuote(Quote),
    QuoteSet(QuoteSet),
    AcceptOffer(Quote),
    Deliver(DeliveryUnit),
    Decline(Decline),
    ProtocolViolation(String),
}

impl Message {
    pub fn performative(&self) -> Performative {
        match self {
            Message::RegisterSupplier => Performative::RegisterSupplier,
            Message::PriceRequest(_) => Performative::PriceRequest,
            Message::QuoteRequest(_) => Performative::QuoteRequest,
            Message::PriceQuote(_) => Performative::PriceQuote,
            Message::QuoteSet(_) => Performative::QuoteSet,
            Message::AcceptOffer(_) => Performative::AcceptOffer,
            Message::Deliver(_) => Performative::Deliver,
            Message::Decline(_) => Performative::Decline,
            Message::ProtocolViolation(_) => Performative::ProtocolViolation,
        }
    }

    /// Encode the payload only; the tag travels in the envelope header
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            Message::RegisterSupplier => Ok(Vec::new()),
            Message::PriceRequest(p) => serde_json::to_vec(p),
            Message::QuoteRequest(p) => serde_json::to_vec(p),
            Message::PriceQuote(p) | Message::AcceptOffer(p) => serde_json::to_vec(p),
            Message::QuoteSet(p) => serde_json::to_vec(p),
            Message::Deliver(p) => serde_json::to_vec(p),
            Message::Decline(p) => serde_json::to_vec(p),
            Message::ProtocolViolation(reason) => serde_json::to_vec(reason),
        };
        encoded.map_err(|e| MarketError::Serialization(e.to_string()))
    }

    pub fn decode(performative: Performative, payload: &[u8]) -> Result<Self> {
        fn parse<T: for<'de> Deserialize<'de>>(tag: Performative, payload: &[u8]) -> Result<T> {
            serde_json::from_slice(payload)
                .map_err(|e| MarketError::Deserialization(format!("{} payload: {}", tag, e)))
        }

        let message = match performative {
            Performative::RegisterSupplier => Message::RegisterSupplier,
            Performative::PriceRequest => Message::PriceRequest(parse(performative, payload)?),
            Performative::QuoteRequest => Message::QuoteRequest(parse(performative, payload)?),
            Performative::PriceQuote => Message::PriceQuote(parse(performative, payload)?),
            Performative::QuoteSet => Message::QuoteSet(parse(performative, payload)?),
            Performative::AcceptOffer => Message::AcceptOffer(parse(performative, payload)?),
            Performative::Deliver => Message::Deliver(parse(performative, payload)?),
            Performative::Decline => Message::Decline(parse(performative, payload)?),
            Performative::ProtocolViolation => {
                Message::ProtocolViolation(parse(performative, payload)?)
            }
        };
        Ok(message)
    }
}

/// Addressed message as carried by the bus
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub performative: Performative,
    pub sender: AgentId,
    pub receiver: AgentId,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(sender: AgentId, receiver: AgentId, message: &Message) -> Result<Self> {
        Ok(Self {
            performative: message.performative(),
            sender,
            receiver,
            payload: message.encode_payload()?,
        })
    }

    /// Protocol-violation reply to the sender of `original`
    pub fn violation(original: &Envelope, reason: impl Into<String>) -> Result<Self> {
        Self::new(
            original.receiver.clone(),
            original.sender.clone(),
            &Message::ProtocolViolation(reason.into()),
        )
    }

    pub fn message(&self) -> Result<Message> {
        Message::decode(self.performative, &self.payload)
    }

    /// Same tag and payload bytes, new route
    pub fn reroute(&self, sender: AgentId, receiver: AgentId) -> Self {
        Self {
            performative: self.performative,
            sender,
            receiver,
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentKind, RoundId};

    fn quote() -> Quote {
        Quote {
            supplier: AgentId::new("supplier-0"),
            price: 60.0,
            kind: ComponentKind::Camshaft,
            consumer: AgentId::new("consumer-0"),
            round: RoundId("r_01".to_string()),
        }
    }

    #[test]
    fn test_envelope_carries_tag_and_payload() {
        let msg = Message::PriceQuote(quote());
        let env = Envelope::new(AgentId::new("supplier-0"), AgentId::new("broker"), &msg).unwrap();

        assert_eq!(env.performative, Performative::PriceQuote);
        assert_eq!(env.message().unwrap(), msg);
    }

    #[test]
    fn test_register_has_empty_payload() {
        let env = Envelope::new(
            AgentId::new("supplier-0"),
            AgentId::new("broker"),
            &Message::RegisterSupplier,
        )
        .unwrap();

        assert!(env.payload.is_empty());
        assert_eq!(env.message().unwrap(), Message::RegisterSupplier);
    }

    #[test]
    fn test_payload_mismatching_tag_fails_to_decode() {
        let mut env = Envelope::new(
            AgentId::new("consumer-0"),
            AgentId::new("broker"),
            &Message::AcceptOffer(quote()),
        )
        .unwrap();
        env.performative = Performative::Deliver;

        assert!(matches!(env.message(), Err(MarketError::Deserialization(_))));
    }

    #[test]
    fn test_garbage_payload_fails_to_decode() {
        let env = Envelope {
            performative: Performative::QuoteSet,
            sender: AgentId::new("broker"),
            receiver: AgentId::new("consumer-0"),
            payload: b"\x00\xffnot json".to_vec(),
        };

        let err = env.message().unwrap_err();
        assert!(err.to_string().contains("quote-set"));
    }

    #[test]
    fn test_reroute_keeps_payload_bytes() {
        let env = Envelope::new(
            AgentId::new("consumer-0"),
            AgentId::new("broker"),
            &Message::AcceptOffer(quote()),
        )
        .unwrap();

        let relayed = env.reroute(AgentId::new("broker"), AgentId::new("supplier-0"));

        assert_eq!(relayed.payload, env.payload);
        assert_eq!(relayed.performative, Performative::AcceptOffer);
        assert_eq!(relayed.sender, AgentId::new("broker"));
        assert_eq!(relayed.receiver, AgentId::new("supplier-0"));
    }

    #[test]
    fn test_violation_goes_back_to_sender() {
        let env = Envelope::new(
            AgentId::new("consumer-0"),
            AgentId::new("supplier-0"),
            &Message::RegisterSupplier,
        )
        .unwrap();

        let reply = Envelope::violation(&env, "unexpected register-supplier").unwrap();

        assert_eq!(reply.receiver, AgentId::new("consumer-0"));
        assert_eq!(reply.sender, AgentId::new("supplier-0"));
        assert_eq!(
            reply.message().unwrap(),
            Message::ProtocolViolation("unexpected register-supplier".to_string())
        );
    }
}
