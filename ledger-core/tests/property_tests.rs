//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify:
//! - Idempotency: replaying a transfer never creates a second row
//! - Cursor: the latest transaction per destination has the highest sequence
//! - Aggregation: memo totals equal the sum of distinct transfers
//! - Memo allocation: invoice memos are unique 10-char `[a-z0-9]` tokens
//! - Cancel guard: only pending and half-paid invoices can be cancelled
//! - Memo lookup: payer-chosen memos never leak into another memo's set

use chrono::{Duration, Utc};
use ledger_core::{
    Config, Error, InvoiceStatus, LedgerStore, NewInvoice, NewTransaction, Storage,
};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

fn new_invoice(price: u64) -> NewInvoice {
    NewInvoice {
        price,
        coin_id: 1,
        accept_others: false,
        expires_at: Utc::now() + Duration::hours(1),
    }
}

fn status_strategy() -> impl Strategy<Value = InvoiceStatus> {
    prop_oneof![
        Just(InvoiceStatus::Pending),
        Just(InvoiceStatus::HalfPaid),
        Just(InvoiceStatus::Paid),
        Just(InvoiceStatus::Expired),
        Just(InvoiceStatus::Cancelled),
    ]
}

/// Strategy for (source, sequence, amount) transfers into one wallet
fn transfers_strategy() -> impl Strategy<Value = Vec<(u8, u64, u64)>> {
    prop::collection::vec((0u8..4, 1u64..200, 1u64..1_000_000), 1..40)
}

fn create_test_storage() -> (Storage, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    (Storage::open(&config).unwrap(), temp_dir)
}

fn transfer(source: u8, sequence: u64, amount: u64) -> NewTransaction {
    NewTransaction {
        src_addr: format!("EQsender{}", source),
        dst_addr: "EQwallet".to_string(),
        coin_id: 1,
        amount,
        tx_hash: format!("{}:{}", source, sequence),
        memo: "invoice-memo".to_string(),
        sequence,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: replaying every event any number of times leaves one row per key
    #[test]
    fn prop_replay_never_duplicates(transfers in transfers_strategy(), replays in 1usize..3) {
        let (storage, _temp) = create_test_storage();

        // First write per key wins
        let mut expected: HashMap<(u8, u64), u64> = HashMap::new();
        for _ in 0..=replays {
            for (source, sequence, amount) in &transfers {
                storage.record_transaction(transfer(*source, *sequence, *amount)).unwrap();
                expected.entry((*source, *sequence)).or_insert(*amount);
            }
        }

        let recorded = storage.transactions_by_memo("invoice-memo").unwrap();
        prop_assert_eq!(recorded.len(), expected.len());

        let total: u64 = recorded.iter().map(|t| t.amount).sum();
        prop_assert_eq!(total, expected.values().sum::<u64>());
    }

    /// Property: cursor equals the highest recorded sequence
    #[test]
    fn prop_latest_is_max_sequence(transfers in transfers_strategy()) {
        let (storage, _temp) = create_test_storage();

        for (source, sequence, amount) in &transfers {
            storage.record_transaction(transfer(*source, *sequence, *amount)).unwrap();
        }

        let max_sequence = transfers.iter().map(|(_, s, _)| *s).max().unwrap();
        let latest = storage.latest_transaction("EQwallet").unwrap().unwrap();
        prop_assert_eq!(latest.sequence, max_sequence);
    }

    /// Property: allocated memos are distinct and well-formed
    #[test]
    fn prop_invoice_memos_unique(count in 1usize..60) {
        let (storage, _temp) = create_test_storage();

        let mut memos = HashSet::new();
        for i in 0..count {
            let invoice = storage.create_invoice(new_invoice(i as u64 + 1)).unwrap();
            prop_assert_eq!(invoice.memo.len(), 10);
            prop_assert!(invoice.memo.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
            prop_assert!(memos.insert(invoice.memo.clone()));
            prop_assert_eq!(storage.invoice_by_memo(&invoice.memo).unwrap(), Some(invoice));
        }
    }

    /// Property: cancellation succeeds exactly from the open statuses
    #[test]
    fn prop_cancel_only_open_invoices(status in status_strategy()) {
        let (storage, _temp) = create_test_storage();
        let mut invoice = storage.create_invoice(new_invoice(100)).unwrap();
        invoice.status = status;
        let invoice = storage.update_invoice(&invoice).unwrap();

        match storage.cancel_invoice(&invoice.memo) {
            Ok(cancelled) => {
                prop_assert!(status.is_open());
                prop_assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
                prop_assert_eq!(cancelled.version, invoice.version + 1);
            }
            Err(Error::InvalidTransition { from, .. }) => {
                prop_assert!(!status.is_open());
                prop_assert_eq!(from, status);
                let stored = storage.invoice_by_memo(&invoice.memo).unwrap().unwrap();
                prop_assert_eq!(stored.status, status);
            }
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }

    /// Property: lookup by memo returns exactly the rows carrying that memo
    #[test]
    fn prop_memo_lookup_is_exact(
        memos in prop::collection::vec(prop::sample::select(vec!["abc", "abc\0", "abc\0junk", "ab", "abcd", "\0abc"]), 1..20)
    ) {
        let (storage, _temp) = create_test_storage();

        let mut expected: HashMap<&str, u64> = HashMap::new();
        for (i, memo) in memos.iter().enumerate() {
            let amount = i as u64 + 1;
            storage.record_transaction(NewTransaction {
                src_addr: "EQpayer".to_string(),
                dst_addr: "EQwallet".to_string(),
                coin_id: 1,
                amount,
                tx_hash: format!("h{}", i),
                memo: memo.to_string(),
                sequence: i as u64 + 1,
            }).unwrap();
            *expected.entry(*memo).or_default() += amount;
        }

        for (memo, total) in &expected {
            let found = storage.transactions_by_memo(memo).unwrap();
            prop_assert!(found.iter().all(|t| t.memo == *memo));
            prop_assert_eq!(found.iter().map(|t| t.amount).sum::<u64>(), *total);
        }
    }
}
