//! Per-session transaction ledger
//!
//! Tracks a charging session's metering state across asynchronous updates.
//! Ids are assigned here, by a monotonically increasing counter; an
//! externally supplied id is never trusted as the storage key.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

/// Ledger misuse; answered with a protocol-level response, never a crash
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown transaction: {0}")]
    UnknownTransaction(i64),

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(i64),
}

/// Charging progress of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Started, no meter update seen yet
    Started,
    /// At least one meter update received
    Active,
    /// Stop processed (the record is removed at this point)
    Ended,
}

/// One charging session's metering record, in Wh
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: i64,
    pub meter_start: i64,
    pub meter_current: Option<i64>,
    pub state: TransactionState,
}

/// Map from transaction id to metering state, single-owner per session
#[derive(Debug, Default)]
pub struct TransactionLedger {
    transactions: HashMap<i64, Transaction>,
    next_id: i64,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self {
            transactions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a new transaction, returning its assigned id
    pub fn start(&mut self, meter_start: i64) -> Result<i64, LedgerError> {
        let id = self.next_id;
        if self.transactions.contains_key(&id) {
            return Err(LedgerError::DuplicateTransaction(id));
        }
        self.next_id += 1;

        self.transactions.insert(
            id,
            Transaction {
                id,
                meter_start,
                meter_current: None,
                state: TransactionState::Started,
            },
        );
        debug!(transaction_id = id, meter_start, "transaction started");
        Ok(id)
    }

    /// Record a meter reading for a running transaction
    pub fn update(&mut self, id: i64, meter_value: i64) -> Result<(), LedgerError> {
        let tx = self
            .transactions
            .get_mut(&id)
            .ok_or(LedgerError::UnknownTransaction(id))?;

        tx.meter_current = Some(meter_value);
        tx.state = TransactionState::Active;
        debug!(transaction_id = id, meter_value, "meter updated");
        Ok(())
    }

    /// End a transaction and return the billed total in Wh.
    ///
    /// The last meter update wins over the stop message's own reading when
    /// they disagree; the explicit meterStop is only used if no update was
    /// ever seen. This mirrors the billing behavior the tamper demonstration
    /// relies on.
    pub fn stop(&mut self, id: i64, meter_stop: i64) -> Result<i64, LedgerError> {
        let tx = self
            .transactions
            .remove(&id)
            .ok_or(LedgerError::UnknownTransaction(id))?;

        let total = tx.meter_current.unwrap_or(meter_stop) - tx.meter_start;
        debug!(transaction_id = id, total, "transaction stopped");
        Ok(total)
    }

    /// Look up a running transaction
    pub fn get(&self, id: i64) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    /// Number of running transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let mut ledger = TransactionLedger::new();
        let a = ledger.start(0).unwrap();
        let b = ledger.start(100).unwrap();
        assert!(b > a);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_full_lifecycle_prefers_last_update() {
        let mut ledger = TransactionLedger::new();
        let id = ledger.start(0).unwrap();
        assert_eq!(ledger.get(id).unwrap().state, TransactionState::Started);

        ledger.update(id, 700).unwrap();
        ledger.update(id, 1400).unwrap();
        assert_eq!(ledger.get(id).unwrap().state, TransactionState::Active);

        // meterStop is advisory once updates exist
        let total = ledger.stop(id, 900).unwrap();
        assert_eq!(total, 1400);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_stop_without_updates_uses_meter_stop() {
        let mut ledger = TransactionLedger::new();
        let id = ledger.start(200).unwrap();
        let total = ledger.stop(id, 1400).unwrap();
        assert_eq!(total, 1200);
    }

    #[test]
    fn test_stop_is_not_idempotent() {
        let mut ledger = TransactionLedger::new();
        let id = ledger.start(0).unwrap();
        ledger.stop(id, 500).unwrap();
        assert_eq!(
            ledger.stop(id, 500),
            Err(LedgerError::UnknownTransaction(id))
        );
    }

    #[test]
    fn test_update_unknown_transaction() {
        let mut ledger = TransactionLedger::new();
        assert_eq!(
            ledger.update(99, 700),
            Err(LedgerError::UnknownTransaction(99))
        );
    }
}
