//! Single-writer event loop hosting one market role

use crate::error::{MarketError, Result};
use crate::transport::{Directory, Envelope, Mailbox, MessageBus};
use crate::types::AgentId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A market participant driven by inbound envelopes and one periodic tick.
///
/// Implementations never touch the bus themselves: every handler returns the
/// envelopes to send, which keeps the engines synchronous and testable.
pub trait Role: Send + 'static {
    fn id(&self) -> &AgentId;

    /// Capability to advertise in the directory while running
    fn advertises(&self) -> Option<&str> {
        None
    }

    /// Capability to look up before starting
    fn discovers(&self) -> Option<&str> {
        None
    }

    /// Called once with the discovered agents, before any message is handled
    fn on_start(&mut self, _discovered: &[AgentId], _now: Instant) -> Result<Vec<Envelope>> {
        Ok(Vec::new())
    }

    fn handle(&mut self, envelope: &Envelope, now: Instant, rng: &mut StdRng) -> Vec<Envelope>;

    fn tick_interval(&self) -> Duration;

    fn on_tick(&mut self, now: Instant, rng: &mut StdRng) -> Vec<Envelope>;
}

/// Convert a handler outcome into outbound traffic.
///
/// Routing errors are logged and dropped; anything else becomes one
/// protocol-violation reply to the sender.
pub fn settle(envelope: &Envelope, result: Result<Vec<Envelope>>) -> Vec<Envelope> {
    match result {
        Ok(outbound) => outbound,
        Err(e) if e.is_routing() => {
            tracing::warn!(
                "{} dropped {} from {}: {}",
                envelope.receiver,
                envelope.performative,
                envelope.sender,
                e
            );
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(
                "{} rejected {} from {}: {}",
                envelope.receiver,
                envelope.performative,
                envelope.sender,
                e
            );
            match Envelope::violation(envelope, e.to_string()) {
                Ok(reply) => vec![reply],
                Err(e) => {
                    tracing::error!("Failed to build protocol-violation reply: {}", e);
                    Vec::new()
                }
            }
        }
    }
}

/// Reject a performative the receiving role does not take part in
pub fn unexpected(envelope: &Envelope) -> Result<Vec<Envelope>> {
    Err(MarketError::ProtocolViolation(format!(
        "{} does not understand {}",
        envelope.receiver, envelope.performative
    )))
}

async fn dispatch(bus: &MessageBus, outbound: Vec<Envelope>) {
    for envelope in outbound {
        let (performative, receiver) = (envelope.performative, envelope.receiver.clone());
        if let Err(e) = bus.send(envelope).await {
            tracing::warn!("Failed to deliver {} to {}: {}", performative, receiver, e);
        }
    }
}

/// Run `role` until `shutdown` fires, handling one envelope or tick at a time.
///
/// Returns the role so callers can inspect its final state.
pub async fn run_agent<R: Role>(
    mut role: R,
    mut mailbox: Mailbox,
    bus: MessageBus,
    directory: Directory,
    shutdown: CancellationToken,
) -> Result<R> {
    let id = role.id().clone();
    let mut rng = StdRng::from_entropy();

    let advertised = role.advertises().map(str::to_string);
    if let Some(capability) = &advertised {
        directory.register(id.clone(), capability).await;
    }

    let discovered = match role.discovers().map(str::to_string) {
        Some(capability) => directory.find_by_capability(&capability).await,
        None => Vec::new(),
    };

    let started = role.on_start(&discovered, Instant::now());
    let outbound = match started {
        Ok(outbound) => outbound,
        Err(e) => {
            tracing::error!("{} failed to start: {}", id, e);
            stop(&id, advertised.is_some(), &bus, &directory).await;
            return Err(e);
        }
    };
    dispatch(&bus, outbound).await;
    tracing::info!("{} running", id);

    let period = role.tick_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // A due tick goes before queued mail so a busy mailbox cannot starve it
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {
                let outbound = role.on_tick(Instant::now(), &mut rng);
                dispatch(&bus, outbound).await;
            }

            received = mailbox.recv() => {
                let Some(envelope) = received else { break };
                let outbound = role.handle(&envelope, Instant::now(), &mut rng);
                dispatch(&bus, outbound).await;
            }
        }
    }

    stop(&id, advertised.is_some(), &bus, &directory).await;
    tracing::info!("{} stopped", id);
    Ok(role)
}

async fn stop(id: &AgentId, advertised: bool, bus: &MessageBus, directory: &Directory) {
    if advertised {
        directory.deregister(id).await;
    }
    bus.unregister(id).await;
}
