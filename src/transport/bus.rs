//! In-process message bus
//!
//! Every participant owns one unbounded mailbox. Delivery is FIFO per
//! sender→receiver pair and carries no ordering guarantee across pairs.

use crate::error::{MarketError, Result};
use crate::types::AgentId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::message::Envelope;

/// Shared routing table from agent identity to mailbox
#[derive(Clone, Default)]
pub struct MessageBus {
    mailboxes: Arc<Mutex<HashMap<AgentId, mpsc::UnboundedSender<Envelope>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a mailbox for `id`
    pub async fn register(&self, id: AgentId) -> Result<Mailbox> {
        let mut mailboxes = self.mailboxes.lock().await;
        if mailboxes.contains_key(&id) {
            return Err(MarketError::AgentAlreadyRegistered(id.0));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        mailboxes.insert(id.clone(), tx);
        tracing::debug!("Opened mailbox for {}", id);

        Ok(Mailbox { owner: id, rx })
    }

    pub async fn unregister(&self, id: &AgentId) {
        if self.mailboxes.lock().await.remove(id).is_some() {
            tracing::debug!("Closed mailbox for {}", id);
        }
    }

    /// Deliver an envelope to its receiver's mailbox
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let mailboxes = self.mailboxes.lock().await;
        let tx = mailboxes
            .get(&envelope.receiver)
            .ok_or_else(|| MarketError::AgentNotFound(envelope.receiver.0.clone()))?;

        tracing::debug!(
            "{} -> {}: {} ({} bytes)",
            envelope.sender,
            envelope.receiver,
            envelope.performative,
            envelope.payload.len()
        );

        tx.send(envelope)
            .map_err(|e| MarketError::ChannelClosed(e.0.receiver.0))
    }

    pub async fn registered(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.mailboxes.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Receiving end owned by exactly one participant
pub struct Mailbox {
    owner: AgentId,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Mailbox {
    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    /// Wait for the next envelope; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Non-blocking poll
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}
