//! Per-round quote aggregation

use crate::error::{MarketError, Result};
use crate::types::{AgentId, ComponentKind, Quote, QuoteSet, RoundId};
use std::collections::HashMap;
use tokio::time::Instant;

/// Aggregation entries are keyed by consumer and round
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoundKey {
    pub consumer: AgentId,
    pub round: RoundId,
}

/// Quotes collected so far for one outstanding consumer request
#[derive(Clone, Debug)]
pub struct AggregationEntry {
    key: RoundKey,
    kind: ComponentKind,
    expected: Vec<AgentId>,
    received: Vec<Quote>,
    deadline: Instant,
}

impl AggregationEntry {
    /// `expected` is the supplier set at fan-out time
    pub fn new(key: RoundKey, kind: ComponentKind, expected: Vec<AgentId>, deadline: Instant) -> Self {
        Self {
            key,
            kind,
            expected,
            received: Vec::new(),
            deadline,
        }
    }

    pub fn key(&self) -> &RoundKey {
        &self.key
    }

    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    pub fn received(&self) -> &[Quote] {
        &self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.expected.len()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Append a quote from a supplier that was asked and has not answered yet
    pub fn add_quote(&mut self, quote: Quote) -> Result<()> {
        if !self.expected.contains(&quote.supplier) {
            return Err(MarketError::MessageRouting(format!(
                "{} was not asked for round {}",
                quote.supplier, self.key.round
            )));
        }
        if self.received.iter().any(|q| q.supplier == quote.supplier) {
            return Err(MarketError::MessageRouting(format!(
                "duplicate quote from {} for round {}",
                quote.supplier, self.key.round
            )));
        }
        if quote.kind != self.kind {
            return Err(MarketError::MessageRouting(format!(
                "{} quoted {} for a {} round",
                quote.supplier, quote.kind, self.kind
            )));
        }

        self.received.push(quote);
        Ok(())
    }

    pub fn into_quote_set(self) -> QuoteSet {
        let complete = self.is_complete();
        QuoteSet {
            round: self.key.round,
            kind: self.kind,
            quotes: self.received,
            complete,
        }
    }
}

/// Open aggregation entries owned by one broker
#[derive(Debug, Default)]
pub struct AggregationTable {
    entries: HashMap<RoundKey, AggregationEntry>,
}

impl AggregationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an entry, returning the one it replaced for the same key
    pub fn open(&mut self, entry: AggregationEntry) -> Option<AggregationEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    /// Record a quote. Returns the finished set, and drops the entry, once
    /// every expected supplier has answered.
    pub fn record(&mut self, quote: Quote) -> Result<Option<(AgentId, QuoteSet)>> {
        let key = RoundKey {
            consumer: quote.consumer.clone(),
            round: quote.round.clone(),
        };

        let entry = self.entries.get_mut(&key).ok_or_else(|| {
            MarketError::MessageRouting(format!(
                "no open round {} for {} (quote from {})",
                key.round, key.consumer, quote.supplier
            ))
        })?;

        entry.add_quote(quote)?;

        if !entry.is_complete() {
            return Ok(None);
        }

        Ok(self
            .entries
            .remove(&key)
            .map(|entry| (key.consumer, entry.into_quote_set())))
    }

    /// Remove every entry past its deadline, yielding the partial sets
    pub fn expire(&mut self, now: Instant) -> Vec<(AgentId, QuoteSet)> {
        let expired: Vec<RoundKey> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|entry| (entry.key.consumer.clone(), entry.into_quote_set()))
            .collect()
    }

    pub fn get(&self, key: &RoundKey) -> Option<&AggregationEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(consumer: &str, round: &str) -> RoundKey {
        RoundKey {
            consumer: AgentId::new(consumer),
            round: RoundId(round.to_string()),
        }
    }

    fn quote(supplier: &str, consumer: &str, round: &str, price: f64) -> Quote {
        Quote {
            supplier: AgentId::new(supplier),
            price,
            kind: ComponentKind::Camshaft,
            consumer: AgentId::new(consumer),
            round: RoundId(round.to_string()),
        }
    }

    fn suppliers(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::new(*n)).collect()
    }

    #[test]
    fn test_entry_completes_at_expected_count() {
        let mut entry = AggregationEntry::new(
            key("c", "r1"),
            ComponentKind::Camshaft,
            suppliers(&["s1", "s2"]),
            Instant::now() + Duration::from_secs(5),
        );

        entry.add_quote(quote("s1", "c", "r1", 60.0)).unwrap();
        assert!(!entry.is_complete());
        entry.add_quote(quote("s2", "c", "r1", 80.0)).unwrap();
        assert!(entry.is_complete());
        assert_eq!(entry.received().len(), 2);
    }

    #[test]
    fn test_entry_rejects_duplicate_and_unexpected() {
        let mut entry = AggregationEntry::new(
            key("c", "r1"),
            ComponentKind::Camshaft,
            suppliers(&["s1", "s2"]),
            Instant::now() + Duration::from_secs(5),
        );

        entry.add_quote(quote("s1", "c", "r1", 60.0)).unwrap();
        assert!(entry.add_quote(quote("s1", "c", "r1", 55.0)).unwrap_err().is_routing());
        assert!(entry.add_quote(quote("s9", "c", "r1", 10.0)).unwrap_err().is_routing());
        assert_eq!(entry.received().len(), 1);
    }

    #[test]
    fn test_entry_rejects_wrong_kind() {
        let mut entry = AggregationEntry::new(
            key("c", "r1"),
            ComponentKind::Alternator,
            suppliers(&["s1"]),
            Instant::now() + Duration::from_secs(5),
        );

        assert!(entry.add_quote(quote("s1", "c", "r1", 60.0)).is_err());
    }

    #[test]
    fn test_table_removes_entry_on_completion() {
        let mut table = AggregationTable::new();
        table.open(AggregationEntry::new(
            key("c", "r1"),
            ComponentKind::Camshaft,
            suppliers(&["s1"]),
            Instant::now() + Duration::from_secs(5),
        ));

        let (consumer, set) = table.record(quote("s1", "c", "r1", 60.0)).unwrap().unwrap();

        assert_eq!(consumer, AgentId::new("c"));
        assert!(set.complete);
        assert_eq!(set.quotes.len(), 1);
        assert!(table.is_empty());

        // Stale reply after the round closed
        assert!(table.record(quote("s1", "c", "r1", 60.0)).unwrap_err().is_routing());
    }

    #[test]
    fn test_table_expire_yields_partial_sets() {
        let mut table = AggregationTable::new();
        let start = Instant::now();
        table.open(AggregationEntry::new(
            key("c", "r1"),
            ComponentKind::Camshaft,
            suppliers(&["s1", "s2"]),
            start + Duration::from_millis(100),
        ));
        table.open(AggregationEntry::new(
            key("d", "r2"),
            ComponentKind::Camshaft,
            suppliers(&["s1", "s2"]),
            start + Duration::from_secs(10),
        ));

        assert!(table.record(quote("s1", "c", "r1", 60.0)).unwrap().is_none());

        let expired = table.expire(start + Duration::from_millis(100));
        assert_eq!(expired.len(), 1);
        let (consumer, set) = &expired[0];
        assert_eq!(consumer, &AgentId::new("c"));
        assert!(!set.complete);
        assert_eq!(set.quotes.len(), 1);

        assert_eq!(table.len(), 1);
        assert!(table.get(&key("d", "r2")).is_some());
    }

    #[test]
    fn test_reopen_same_key_replaces() {
        let mut table = AggregationTable::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        table.open(AggregationEntry::new(
            key("c", "r1"),
            ComponentKind::Camshaft,
            suppliers(&["s1"]),
            deadline,
        ));
        let replaced = table.open(AggregationEntry::new(
            key("c", "r1"),
            ComponentKind::Camshaft,
            suppliers(&["s1", "s2"]),
            deadline,
        ));

        assert_eq!(replaced.unwrap().expected_count(), 1);
        assert_eq!(table.get(&key("c", "r1")).unwrap().expected_count(), 2);
    }
}
