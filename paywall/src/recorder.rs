//! Idempotent transfer recording

use crate::metrics::TRANSACTIONS_RECORDED_TOTAL;
use ledger_core::{LedgerStore, NewTransaction, RecordOutcome};
use std::sync::Arc;
use tracing::{debug, info};

/// Writes classified transfers to the ledger
///
/// Replays of an already recorded (source, destination, sequence) return
/// the stored row instead of writing a second one.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn LedgerStore>,
    network: String,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder").field("network", &self.network).finish()
    }
}

impl Recorder {
    /// Create a recorder for one network
    pub fn new(store: Arc<dyn LedgerStore>, network: impl Into<String>) -> Self {
        Self {
            store,
            network: network.into(),
        }
    }

    /// Record one transfer
    pub fn record(&self, tx: NewTransaction) -> ledger_core::Result<RecordOutcome> {
        let outcome = self.store.record_transaction(tx)?;
        let stored = outcome.transaction();

        if outcome.is_inserted() {
            info!(
                network = %self.network,
                id = stored.id,
                src = %stored.src_addr,
                amount = stored.amount,
                memo = %stored.memo,
                sequence = stored.sequence,
                "Recorded transfer"
            );
        } else {
            debug!(
                network = %self.network,
                id = stored.id,
                sequence = stored.sequence,
                "Transfer already recorded"
            );
        }

        let result = if outcome.is_inserted() { "inserted" } else { "duplicate" };
        TRANSACTIONS_RECORDED_TOTAL
            .with_label_values(&[self.network.as_str(), result])
            .inc();

        Ok(outcome)
    }
}
