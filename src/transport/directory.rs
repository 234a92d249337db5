//! Capability directory used to locate brokers

use crate::types::AgentId;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Advertisement {
    agent: AgentId,
    capability: String,
}

/// Yellow-pages style lookup: agents advertise capabilities, others search by tag
#[derive(Clone, Default)]
pub struct Directory {
    entries: Arc<Mutex<Vec<Advertisement>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise `capability` for `agent`. Re-advertising is a no-op.
    pub async fn register(&self, agent: AgentId, capability: &str) {
        let mut entries = self.entries.lock().await;
        let ad = Advertisement {
            agent,
            capability: capability.to_string(),
        };
        if !entries.contains(&ad) {
            tracing::info!("{} advertises {}", ad.agent, ad.capability);
            entries.push(ad);
        }
    }

    /// Withdraw every advertisement of `agent`
    pub async fn deregister(&self, agent: &AgentId) {
        self.entries.lock().await.retain(|ad| &ad.agent != agent);
        tracing::info!("{} withdrew from the directory", agent);
    }

    /// Agents advertising `capability`, in registration order
    pub async fn find_by_capability(&self, capability: &str) -> Vec<AgentId> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|ad| ad.capability == capability)
            .map(|ad| ad.agent.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TRADING_CAPABILITY;

    #[tokio::test]
    async fn test_find_in_registration_order() {
        let directory = Directory::new();
        directory.register(AgentId::new("broker-b"), TRADING_CAPABILITY).await;
        directory.register(AgentId::new("broker-a"), TRADING_CAPABILITY).await;
        directory.register(AgentId::new("auditor"), "audit").await;

        let found = directory.find_by_capability(TRADING_CAPABILITY).await;
        assert_eq!(found, vec![AgentId::new("broker-b"), AgentId::new("broker-a")]);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let directory = Directory::new();
        directory.register(AgentId::new("broker"), TRADING_CAPABILITY).await;
        directory.register(AgentId::new("broker"), TRADING_CAPABILITY).await;

        assert_eq!(directory.find_by_capability(TRADING_CAPABILITY).await.len(), 1);
    }

    #[tokio::test]
    async fn test_deregister() {
        let directory = Directory::new();
        directory.register(AgentId::new("broker"), TRADING_CAPABILITY).await;
        directory.deregister(&AgentId::new("broker")).await;

        assert!(directory.find_by_capability(TRADING_CAPABILITY).await.is_empty());
    }
}
