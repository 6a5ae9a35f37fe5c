use super::money::Money;
use super::transaction::Transaction;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Bucket a transaction settles into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SettlementKey {
    pub merchant_id: String,
    pub date: NaiveDate,
}

impl SettlementKey {
    pub fn new(merchant_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            date,
        }
    }
}

/// Accumulated amounts for one [`SettlementKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SettlementTotals {
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
    pub count: u64,
}

impl SettlementTotals {
    fn seed(tx: &Transaction) -> Self {
        Self {
            gross: tx.amount,
            fee: tx.fee,
            net: tx.amount - tx.fee,
            count: 1,
        }
    }

    fn add_transaction(&mut self, tx: &Transaction) {
        self.gross += tx.amount;
        self.fee += tx.fee;
        self.net = self.gross - self.fee;
        self.count += 1;
    }

    /// Additive merge used by the settlement store.
    pub fn merge(&mut self, other: &SettlementTotals) {
        self.gross += other.gross;
        self.fee += other.fee;
        self.net += other.net;
        self.count += other.count;
    }
}

/// In-memory reduction of one job run, keyed by merchant and payment day.
///
/// Keys iterate in `(merchant_id, date)` order, which gives the result
/// artifact a stable row order.
#[derive(Debug, Default, Clone)]
pub struct SettlementAggregate {
    buckets: BTreeMap<SettlementKey, SettlementTotals>,
}

impl SettlementAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a transaction in. Returns `false` for rows that do not settle,
    /// which callers must not count as processed.
    pub fn record(&mut self, tx: &Transaction) -> bool {
        if !tx.status.is_settleable() {
            return false;
        }

        let key = SettlementKey::new(tx.merchant_id.clone(), tx.settlement_date());
        self.buckets
            .entry(key)
            .and_modify(|totals| totals.add_transaction(tx))
            .or_insert_with(|| SettlementTotals::seed(tx));
        true
    }

    pub fn get(&self, key: &SettlementKey) -> Option<&SettlementTotals> {
        self.buckets.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SettlementKey, &SettlementTotals)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Durable per-merchant/day ledger row, cumulative across every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub key: SettlementKey,
    pub totals: SettlementTotals,
    /// Most recent run that contributed to this row.
    pub run_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    pub fn new(run_id: Uuid, key: SettlementKey, totals: SettlementTotals) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            totals,
            run_id,
            updated_at: Utc::now(),
        }
    }

    /// Adds a run's contribution. Only the run tag is replaced.
    pub fn absorb(&mut self, run_id: Uuid, totals: &SettlementTotals) {
        self.totals.merge(totals);
        self.run_id = run_id;
        self.updated_at = Utc::now();
    }
}
