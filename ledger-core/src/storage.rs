//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `meta` - Schema version and id counters
//! - `coins` - Coin reference data (key: id)
//! - `wallets` - Monitored wallets (key: id)
//! - `transactions` - Append-only transfers (key: src || dst || sequence)
//! - `tx_by_dst` - Index for cursor lookup (key: dst || sequence || src)
//! - `tx_by_memo` - Index for invoice aggregation (key: memo || transaction key)
//! - `invoices` - Invoices (key: memo)
//!
//! All writes go through one write lock so existence checks and inserts are
//! a single atomic step with respect to other writers of this process.

use crate::{
    config::MemoConfig,
    error::{Error, Result},
    memo,
    store::{LedgerStore, RecordOutcome},
    types::{
        Coin, Invoice, InvoiceStatus, NewCoin, NewInvoice, NewTransaction, NewWallet,
        Transaction, Wallet, WalletStatus,
    },
    Config,
};
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::PathBuf;

/// Column family names
const CF_META: &str = "meta";
const CF_COINS: &str = "coins";
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_TX_BY_DST: &str = "tx_by_dst";
const CF_TX_BY_MEMO: &str = "tx_by_memo";
const CF_INVOICES: &str = "invoices";

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 1;

const META_SCHEMA_VERSION: &[u8] = b"schema_version";


/// Table specification consumed by the migration runner
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Column family name
    pub name: &'static str,
    /// Column family options
    pub options: fn() -> Options,
}

/// Every table, in creation order
pub const TABLES: &[TableSpec] = &[
    TableSpec { name: CF_META, options: cf_options_small },
    TableSpec { name: CF_COINS, options: cf_options_small },
    TableSpec { name: CF_WALLETS, options: cf_options_small },
    TableSpec { name: CF_TRANSACTIONS, options: cf_options_log },
    TableSpec { name: CF_TX_BY_DST, options: cf_options_index },
    TableSpec { name: CF_TX_BY_MEMO, options: cf_options_index },
    TableSpec { name: CF_INVOICES, options: cf_options_small },
];

// Column family options

fn cf_options_small() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(DBCompressionType::Lz4);
    opts
}

fn cf_options_log() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(DBCompressionType::Zstd);
    opts.set_bottommost_compression_type(DBCompressionType::Zstd);
    opts
}

fn cf_options_index() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(DBCompressionType::Lz4);
    // Indices benefit from bloom filters
    let mut block_opts = rocksdb::BlockBasedOptions::default();
    block_opts.set_bloom_filter(10.0, false);
    opts.set_block_based_table_factory(&block_opts);
    opts
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    path: PathBuf,
    memo: MemoConfig,
    write_lock: Mutex<()>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").field("path", &self.path).finish()
    }
}

impl Storage {
    /// Open or create database and run migrations
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = TABLES
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name, (table.options)()));

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let storage = Self {
            db,
            path: path.clone(),
            memo: config.memo.clone(),
            write_lock: Mutex::new(()),
        };
        storage.migrate()?;

        tracing::info!(
            path = ?storage.path,
            tables = TABLES.len(),
            schema_version = SCHEMA_VERSION,
            "Opened ledger storage"
        );

        Ok(storage)
    }

    /// Check every table exists and stamp the schema version
    fn migrate(&self) -> Result<()> {
        for table in TABLES {
            self.cf_handle(table.name)?;
        }

        let meta = self.cf_handle(CF_META)?;
        match self.db.get_cf(meta, META_SCHEMA_VERSION)? {
            Some(raw) => {
                let found: u32 = bincode::deserialize(&raw)?;
                if found > SCHEMA_VERSION {
                    return Err(Error::Config(format!(
                        "Database schema version {} is newer than supported {}",
                        found, SCHEMA_VERSION
                    )));
                }
                if found < SCHEMA_VERSION {
                    tracing::info!(from = found, to = SCHEMA_VERSION, "Upgrading schema version");
                    self.db
                        .put_cf(meta, META_SCHEMA_VERSION, bincode::serialize(&SCHEMA_VERSION)?)?;
                }
            }
            None => {
                self.db
                    .put_cf(meta, META_SCHEMA_VERSION, bincode::serialize(&SCHEMA_VERSION)?)?;
            }
        }
        Ok(())
    }

    /// Stored schema version
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let meta = self.cf_handle(CF_META)?;
        self.get_decoded(meta, META_SCHEMA_VERSION)
    }

    // Helpers

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_decoded<T: DeserializeOwned>(&self, cf: &ColumnFamily, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(cf, key)? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &ColumnFamily) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(bincode::deserialize(&value)?);
        }
        Ok(rows)
    }

    /// Allocate the next id for `table`; caller must hold the write lock
    fn next_id(&self, batch: &mut WriteBatch, table: &str) -> Result<u64> {
        let meta = self.cf_handle(CF_META)?;
        let key = format!("next_id:{}", table);
        let current: u64 = self.get_decoded(meta, key.as_bytes())?.unwrap_or(0);
        let next = current + 1;
        batch.put_cf(meta, key.as_bytes(), bincode::serialize(&next)?);
        Ok(next)
    }

    fn put_invoice_locked(&self, invoice: &Invoice) -> Result<()> {
        let cf = self.cf_handle(CF_INVOICES)?;
        self.db
            .put_cf(cf, invoice.memo.as_bytes(), bincode::serialize(invoice)?)?;
        Ok(())
    }

    // Key helpers

    /// Length-prefixed key component; memos and sender addresses are
    /// payer-controlled and may contain any byte
    fn push_field(key: &mut Vec<u8>, field: &str) {
        key.extend_from_slice(&(field.len() as u32).to_be_bytes());
        key.extend_from_slice(field.as_bytes());
    }

    fn transaction_key(src: &str, dst: &str, sequence: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(src.len() + dst.len() + 16);
        Self::push_field(&mut key, src);
        Self::push_field(&mut key, dst);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn dst_prefix(dst: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(dst.len() + 4);
        Self::push_field(&mut key, dst);
        key
    }

    fn index_key_dst(dst: &str, sequence: u64, src: &str) -> Vec<u8> {
        let mut key = Self::dst_prefix(dst);
        key.extend_from_slice(&sequence.to_be_bytes());
        key.extend_from_slice(src.as_bytes());
        key
    }

    fn memo_prefix(memo: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(memo.len() + 4);
        Self::push_field(&mut key, memo);
        key
    }
}

impl LedgerStore for Storage {
    fn insert_coin(&self, coin: NewCoin) -> Result<Coin> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, CF_COINS)?;
        let coin = Coin {
            id,
            name: coin.name,
            network: coin.network,
            unit: coin.unit,
            unit_factor: coin.unit_factor,
        };
        batch.put_cf(self.cf_handle(CF_COINS)?, id.to_be_bytes(), bincode::serialize(&coin)?);
        self.db.write(batch)?;
        Ok(coin)
    }

    fn coin(&self, id: u64) -> Result<Option<Coin>> {
        self.get_decoded(self.cf_handle(CF_COINS)?, &id.to_be_bytes())
    }

    fn coin_by_unit(&self, network: &str, unit: &str) -> Result<Option<Coin>> {
        let coins: Vec<Coin> = self.scan(self.cf_handle(CF_COINS)?)?;
        Ok(coins
            .into_iter()
            .find(|c| c.network == network && c.unit == unit))
    }

    fn insert_wallet(&self, wallet: NewWallet) -> Result<Wallet> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, CF_WALLETS)?;
        let wallet = Wallet {
            id,
            address: wallet.address,
            network: wallet.network,
            status: wallet.status,
        };
        batch.put_cf(
            self.cf_handle(CF_WALLETS)?,
            id.to_be_bytes(),
            bincode::serialize(&wallet)?,
        );
        self.db.write(batch)?;
        Ok(wallet)
    }

    fn wallets_by_status(&self, network: &str, status: WalletStatus) -> Result<Vec<Wallet>> {
        let wallets: Vec<Wallet> = self.scan(self.cf_handle(CF_WALLETS)?)?;
        Ok(wallets
            .into_iter()
            .filter(|w| w.network == network && w.status == status)
            .collect())
    }

    fn record_transaction(&self, tx: NewTransaction) -> Result<RecordOutcome> {
        let cf_tx = self.cf_handle(CF_TRANSACTIONS)?;
        let key = Self::transaction_key(&tx.src_addr, &tx.dst_addr, tx.sequence);

        let _guard = self.write_lock.lock();

        if let Some(existing) = self.get_decoded::<Transaction>(cf_tx, &key)? {
            tracing::debug!(
                src = %tx.src_addr,
                dst = %tx.dst_addr,
                sequence = tx.sequence,
                "Transaction already recorded"
            );
            return Ok(RecordOutcome::Duplicate(existing));
        }

        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, CF_TRANSACTIONS)?;
        let record = Transaction {
            id,
            src_addr: tx.src_addr,
            dst_addr: tx.dst_addr,
            coin_id: tx.coin_id,
            amount: tx.amount,
            tx_hash: tx.tx_hash,
            memo: tx.memo,
            sequence: tx.sequence,
            created_at: Utc::now(),
        };

        batch.put_cf(cf_tx, &key, bincode::serialize(&record)?);
        batch.put_cf(
            self.cf_handle(CF_TX_BY_DST)?,
            Self::index_key_dst(&record.dst_addr, record.sequence, &record.src_addr),
            &key,
        );
        if !record.memo.is_empty() {
            let mut memo_key = Self::memo_prefix(&record.memo);
            memo_key.extend_from_slice(&key);
            batch.put_cf(self.cf_handle(CF_TX_BY_MEMO)?, memo_key, &key);
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            id = record.id,
            dst = %record.dst_addr,
            sequence = record.sequence,
            memo = %record.memo,
            "Transaction recorded"
        );

        Ok(RecordOutcome::Inserted(record))
    }

    fn latest_transaction(&self, dst_addr: &str) -> Result<Option<Transaction>> {
        let cf_idx = self.cf_handle(CF_TX_BY_DST)?;
        let prefix = Self::dst_prefix(dst_addr);
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xFF; 9]);

        let mut iter = self
            .db
            .iterator_cf(cf_idx, IteratorMode::From(&upper, Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (key, tx_key) = item?;
                if !key.starts_with(&prefix) {
                    return Ok(None);
                }
                self.get_decoded(self.cf_handle(CF_TRANSACTIONS)?, &tx_key)
            }
            None => Ok(None),
        }
    }

    fn transactions_by_memo(&self, memo: &str) -> Result<Vec<Transaction>> {
        if memo.is_empty() {
            return Ok(Vec::new());
        }

        let cf_idx = self.cf_handle(CF_TX_BY_MEMO)?;
        let cf_tx = self.cf_handle(CF_TRANSACTIONS)?;
        let prefix = Self::memo_prefix(memo);

        let mut transactions = Vec::new();
        for item in self
            .db
            .iterator_cf(cf_idx, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, tx_key) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let tx = self
                .get_decoded::<Transaction>(cf_tx, &tx_key)?
                .ok_or_else(|| Error::Storage(format!("Dangling memo index for {}", memo)))?;
            if tx.memo == memo {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    fn create_invoice(&self, invoice: NewInvoice) -> Result<Invoice> {
        let cf = self.cf_handle(CF_INVOICES)?;
        let _guard = self.write_lock.lock();

        for attempt in 1..=self.memo.max_attempts {
            let memo = memo::generate(self.memo.length);
            if self.db.get_cf(cf, memo.as_bytes())?.is_some() {
                tracing::debug!(attempt, "Memo collision, retrying");
                continue;
            }

            let mut batch = WriteBatch::default();
            let id = self.next_id(&mut batch, CF_INVOICES)?;
            let now = Utc::now();
            let record = Invoice {
                id,
                memo,
                status: InvoiceStatus::Pending,
                price: invoice.price,
                coin_id: invoice.coin_id,
                accept_others: invoice.accept_others,
                expires_at: invoice.expires_at,
                version: 1,
                paid_notified: false,
                created_at: now,
                updated_at: now,
            };
            batch.put_cf(cf, record.memo.as_bytes(), bincode::serialize(&record)?);
            self.db.write(batch)?;

            tracing::info!(id = record.id, memo = %record.memo, price = record.price, "Invoice created");
            return Ok(record);
        }

        Err(Error::MemoExhausted(self.memo.max_attempts))
    }

    fn invoice_by_memo(&self, memo: &str) -> Result<Option<Invoice>> {
        self.get_decoded(self.cf_handle(CF_INVOICES)?, memo.as_bytes())
    }

    fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice> {
        let cf = self.cf_handle(CF_INVOICES)?;
        let _guard = self.write_lock.lock();

        let current: Invoice = self
            .get_decoded(cf, invoice.memo.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("invoice {}", invoice.memo)))?;

        if current.version != invoice.version {
            return Err(Error::VersionConflict {
                memo: invoice.memo.clone(),
                expected: invoice.version,
                actual: current.version,
            });
        }

        let mut updated = invoice.clone();
        updated.version = current.version + 1;
        updated.updated_at = Utc::now();
        self.put_invoice_locked(&updated)?;
        Ok(updated)
    }

    fn cancel_invoice(&self, memo: &str) -> Result<Invoice> {
        let cf = self.cf_handle(CF_INVOICES)?;
        let _guard = self.write_lock.lock();

        let mut invoice: Invoice = self
            .get_decoded(cf, memo.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("invoice {}", memo)))?;

        invoice.cancel()?;
        invoice.version += 1;
        invoice.updated_at = Utc::now();
        self.put_invoice_locked(&invoice)?;

        tracing::info!(memo = %invoice.memo, "Invoice cancelled");
        Ok(invoice)
    }
}
