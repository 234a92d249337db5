//! Market application wiring one broker, its suppliers and consumers

use crate::broker::BrokerEngine;
use crate::config::{MarketConfig, SupplierConfig};
use crate::consumer::ConsumerEngine;
use crate::error::{MarketError, Result};
use crate::runtime::{run_agent, Role};
use crate::supplier::SupplierEngine;
use crate::transport::{Directory, MessageBus};
use crate::types::{AgentId, ComponentKind, PricedComponent};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long suppliers and consumers wait for the broker to advertise itself
const BROKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const BROKER_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Serialize)]
pub struct SupplierReport {
    pub id: AgentId,
    pub balance: f64,
    pub stock: BTreeMap<ComponentKind, u32>,
    pub prices: BTreeMap<ComponentKind, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerReport {
    pub id: AgentId,
    pub balance: f64,
    pub owned: Vec<PricedComponent>,
    pub outstanding_rounds: usize,
}

/// Final state of every participant after a run
#[derive(Debug, Clone, Serialize)]
pub struct MarketReport {
    pub broker: AgentId,
    pub registered_suppliers: usize,
    pub open_aggregations: usize,
    pub suppliers: Vec<SupplierReport>,
    pub consumers: Vec<ConsumerReport>,
}

impl MarketReport {
    pub fn supplier(&self, id: &str) -> Option<&SupplierReport> {
        self.suppliers.iter().find(|s| s.id.0 == id)
    }

    pub fn consumer(&self, id: &str) -> Option<&ConsumerReport> {
        self.consumers.iter().find(|c| c.id.0 == id)
    }
}

/// One broker plus its suppliers and consumers on a shared bus
pub struct MarketApp {
    bus: MessageBus,
    directory: Directory,
    broker: BrokerEngine,
    suppliers: Vec<SupplierEngine>,
    consumers: Vec<ConsumerEngine>,
}

impl MarketApp {
    /// Build a market where every supplier uses `config.supplier`
    pub fn new(config: MarketConfig, suppliers: usize, consumers: usize) -> Result<Self> {
        let supplier_configs = vec![config.supplier.clone(); suppliers];
        Self::with_supplier_configs(config, supplier_configs, consumers)
    }

    /// Build a market with one supplier per entry of `supplier_configs`
    pub fn with_supplier_configs(
        config: MarketConfig,
        supplier_configs: Vec<SupplierConfig>,
        consumers: usize,
    ) -> Result<Self> {
        config.validate()?;
        for supplier in &supplier_configs {
            MarketConfig {
                supplier: supplier.clone(),
                ..config.clone()
            }
            .validate()?;
        }

        let capability = config.broker.capability.clone();
        let broker = BrokerEngine::new(AgentId::new("broker"), config.broker.clone());

        let suppliers = supplier_configs
            .into_iter()
            .enumerate()
            .map(|(i, supplier)| {
                SupplierEngine::new(
                    AgentId::new(format!("supplier-{}", i + 1)),
                    supplier,
                    capability.clone(),
                )
            })
            .collect();

        let consumers = (1..=consumers)
            .map(|i| {
                ConsumerEngine::new(
                    AgentId::new(format!("consumer-{}", i)),
                    config.consumer.clone(),
                    capability.clone(),
                )
            })
            .collect();

        Ok(Self {
            bus: MessageBus::new(),
            directory: Directory::new(),
            broker,
            suppliers,
            consumers,
        })
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Run until `duration` elapses or `shutdown` fires, then collect a report.
    ///
    /// The broker starts first; suppliers and consumers start once it is
    /// discoverable.
    pub async fn run(
        self,
        duration: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Result<MarketReport> {
        let Self {
            bus,
            directory,
            broker,
            suppliers,
            consumers,
        } = self;
        let capability = broker.advertises().unwrap_or_default().to_string();
        let broker_id = broker.id().clone();

        // Every mailbox exists before anyone sends
        let broker_handle = spawn(broker, &bus, &directory, &shutdown).await?;
        let mut supplier_slots = Vec::with_capacity(suppliers.len());
        for supplier in suppliers {
            let mailbox = bus.register(supplier.id().clone()).await?;
            supplier_slots.push((supplier, mailbox));
        }
        let mut consumer_slots = Vec::with_capacity(consumers.len());
        for consumer in consumers {
            let mailbox = bus.register(consumer.id().clone()).await?;
            consumer_slots.push((consumer, mailbox));
        }

        wait_for_broker(&directory, &capability).await?;
        tracing::info!(
            "Market open: {} suppliers, {} consumers via {}",
            supplier_slots.len(),
            consumer_slots.len(),
            broker_id
        );

        let supplier_handles: Vec<_> = supplier_slots
            .into_iter()
            .map(|(role, mailbox)| {
                tokio::spawn(run_agent(
                    role,
                    mailbox,
                    bus.clone(),
                    directory.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();
        let consumer_handles: Vec<_> = consumer_slots
            .into_iter()
            .map(|(role, mailbox)| {
                tokio::spawn(run_agent(
                    role,
                    mailbox,
                    bus.clone(),
                    directory.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        match duration {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        tracing::info!("Run finished after {:?}", duration);
                    }
                    _ = shutdown.cancelled() => {}
                }
            }
            None => shutdown.cancelled().await,
        }
        shutdown.cancel();

        let (broker, suppliers, consumers) = tokio::join!(
            broker_handle,
            join_all(supplier_handles),
            join_all(consumer_handles)
        );

        let broker = settled(broker)?
            .ok_or_else(|| MarketError::Internal(format!("{} did not stop cleanly", broker_id)))?;
        let suppliers = suppliers
            .into_iter()
            .map(settled)
            .collect::<Result<Vec<_>>>()?;
        let consumers = consumers
            .into_iter()
            .map(settled)
            .collect::<Result<Vec<_>>>()?;

        Ok(MarketReport {
            broker: broker_id,
            registered_suppliers: broker.suppliers().len(),
            open_aggregations: broker.aggregations().len(),
            suppliers: suppliers
                .into_iter()
                .flatten()
                .map(|s| SupplierReport {
                    id: s.id().clone(),
                    balance: s.ledger().balance(),
                    stock: s.ledger().stock_levels().clone(),
                    prices: s.ledger().prices().clone(),
                })
                .collect(),
            consumers: consumers
                .into_iter()
                .flatten()
                .map(|c| ConsumerReport {
                    id: c.id().clone(),
                    balance: c.wallet().balance(),
                    owned: c.wallet().owned().to_vec(),
                    outstanding_rounds: c.outstanding(),
                })
                .collect(),
        })
    }
}

async fn spawn<R: Role>(
    role: R,
    bus: &MessageBus,
    directory: &Directory,
    shutdown: &CancellationToken,
) -> Result<JoinHandle<Result<R>>> {
    let mailbox = bus.register(role.id().clone()).await?;
    Ok(tokio::spawn(run_agent(
        role,
        mailbox,
        bus.clone(),
        directory.clone(),
        shutdown.clone(),
    )))
}

async fn wait_for_broker(directory: &Directory, capability: &str) -> Result<()> {
    let found = tokio::time::timeout(BROKER_STARTUP_TIMEOUT, async {
        while directory.find_by_capability(capability).await.is_empty() {
            tokio::time::sleep(BROKER_POLL_INTERVAL).await;
        }
    })
    .await;

    found.map_err(|_| MarketError::NoBrokerFound(capability.to_string()))
}

/// Agents that failed to start are left out of the report; a panicked task
/// is an error
fn settled<R>(joined: std::result::Result<Result<R>, tokio::task::JoinError>) -> Result<Option<R>> {
    match joined {
        Ok(Ok(role)) => Ok(Some(role)),
        Ok(Err(e)) => {
            tracing::error!("Agent exited with error: {}", e);
            Ok(None)
        }
        Err(e) => Err(MarketError::Internal(format!("Agent task failed: {}", e))),
    }
}
