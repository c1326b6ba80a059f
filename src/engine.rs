//! Engine: runs the reconciliation stages in order over one snapshot of
//! both exports. Subscription rows build the registry and plate index,
//! transaction rows are grouped into per-identity sessions, and every
//! identity's sessions are scanned for overlaps.
//!
//! Typical usage:
//!
//! ```no_run
//! use parkaudit::engine::Engine;
//! # fn main() -> anyhow::Result<()> {
//! let mut engine = Engine::new();
//! engine.load_from_file_paths("subscriptions.csv", "transactions.csv")?;
//! println!("{}", parkaudit::report::render_summary(&engine));
//! # Ok(())
//! # }
//! ```
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::grouper::{GroupStats, group_transactions};
use crate::io::{DEFAULT_MMAP_THRESHOLD_BYTES, read_text_auto};
use crate::registry::Registry;
use crate::rows::{
    Loaded, RowFilter, RowsError, SubscriptionRow, TransactionRow, parse_subscriptions,
    parse_transactions,
};
use crate::scanner::{ScanStats, scan_all};
use crate::ticks::{TickError, TickMode};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transaction #{row}, {field}: {source}")]
    Parse {
        row: usize,
        field: &'static str,
        #[source]
        source: TickError,
    },
    #[error("transaction #{row}, {field}: not a number: {value:?}")]
    BadNumber {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Rows(#[from] RowsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub tick_mode: TickMode,
    /// Backfill external ids into plate-keyed identities.
    pub identify_unknown: bool,
    /// Skip malformed transactions instead of aborting the run.
    pub skip_malformed: bool,
    pub parallel: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick_mode: TickMode::Approximate,
            identify_unknown: true,
            skip_malformed: false,
            parallel: false,
        }
    }
}

/// Row counts before and after filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub subscriptions_read: usize,
    pub subscriptions_kept: usize,
    pub transactions_read: usize,
    pub transactions_kept: usize,
}

/// Holds the registry and the statistics of the last run.
#[derive(Debug, Default)]
pub struct Engine {
    pub options: EngineOptions,
    pub filter: RowFilter,
    pub registry: Registry,
    pub input: InputStats,
    pub grouping: GroupStats,
    pub scan: ScanStats,
}

impl Engine {
    /// Engine with default options and the default row filter.
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default(), RowFilter::default())
    }

    pub fn with_options(options: EngineOptions, filter: RowFilter) -> Self {
        Self {
            options,
            filter,
            ..Self::default()
        }
    }

    /// Run every stage over already filtered rows. Previous results are
    /// discarded first, so identical input always yields identical output.
    pub fn run(
        &mut self,
        subscriptions: &[SubscriptionRow],
        transactions: &[TransactionRow],
    ) -> Result<(), EngineError> {
        self.input = InputStats {
            subscriptions_read: subscriptions.len(),
            subscriptions_kept: subscriptions.len(),
            transactions_read: transactions.len(),
            transactions_kept: transactions.len(),
        };
        self.process(subscriptions, transactions)
    }

    fn process(
        &mut self,
        subscriptions: &[SubscriptionRow],
        transactions: &[TransactionRow],
    ) -> Result<(), EngineError> {
        self.registry = Registry::new();
        self.grouping = GroupStats::default();
        self.scan = ScanStats::default();
        for row in subscriptions {
            self.registry.register_row(row);
        }
        let mismatched = self.registry.detect_mismatches();
        self.registry.verify_invariants()?;
        let stats = self.registry.stats();
        info!(
            "registry: {} email identities, {} plate-keyed, {} mismatched",
            stats.email_identities, stats.plate_identities, mismatched
        );

        self.grouping = group_transactions(&mut self.registry, transactions, &self.options)?;
        self.scan = scan_all(self.registry.identities_mut(), self.options.parallel);
        self.registry.verify_invariants()
    }

    fn run_loaded(
        &mut self,
        subscriptions: Loaded<SubscriptionRow>,
        transactions: Loaded<TransactionRow>,
    ) -> Result<(), EngineError> {
        self.input = InputStats {
            subscriptions_read: subscriptions.read,
            subscriptions_kept: subscriptions.rows.len(),
            transactions_read: transactions.read,
            transactions_kept: transactions.rows.len(),
        };
        info!(
            "loaded {} of {} subscription rows, {} of {} transaction rows",
            self.input.subscriptions_kept,
            self.input.subscriptions_read,
            self.input.transactions_kept,
            self.input.transactions_read
        );
        self.process(&subscriptions.rows, &transactions.rows)
    }

    /// Load both exports from in-memory text. Intended for tests and small
    /// programmatic integrations.
    pub fn load_from_strings(
        &mut self,
        subscriptions: &str,
        transactions: &str,
    ) -> Result<(), EngineError> {
        let subs = parse_subscriptions(subscriptions, &self.filter)?;
        let txns = parse_transactions(transactions, &self.filter)?;
        self.run_loaded(subs, txns)
    }

    /// Read, decode, filter and process both exports.
    pub fn load_from_file_paths_with_threshold<P: AsRef<Path>>(
        &mut self,
        subscriptions_path: P,
        transactions_path: P,
        mmap_threshold_bytes: u64,
    ) -> Result<()> {
        let subs = load_subscriptions(&subscriptions_path, &self.filter, mmap_threshold_bytes)?;
        let txns = load_transactions(&transactions_path, &self.filter, mmap_threshold_bytes)?;
        self.run_loaded(subs, txns)?;
        Ok(())
    }

    /// Like [`Engine::load_from_file_paths_with_threshold`] but reads and
    /// parses the two exports concurrently.
    pub fn load_from_file_paths_parallel_with_threshold<P: AsRef<Path> + Sync>(
        &mut self,
        subscriptions_path: P,
        transactions_path: P,
        mmap_threshold_bytes: u64,
    ) -> Result<()> {
        let filter = &self.filter;
        let (subs, txns) = rayon::join(
            || load_subscriptions(&subscriptions_path, filter, mmap_threshold_bytes),
            || load_transactions(&transactions_path, filter, mmap_threshold_bytes),
        );
        self.run_loaded(subs?, txns?)?;
        Ok(())
    }

    /// Convenience wrapper that uses the default mmap threshold.
    pub fn load_from_file_paths<P: AsRef<Path>>(
        &mut self,
        subscriptions_path: P,
        transactions_path: P,
    ) -> Result<()> {
        self.load_from_file_paths_with_threshold(
            subscriptions_path,
            transactions_path,
            DEFAULT_MMAP_THRESHOLD_BYTES,
        )
    }
}

fn load_subscriptions<P: AsRef<Path>>(
    path: P,
    filter: &RowFilter,
    threshold: u64,
) -> Result<Loaded<SubscriptionRow>> {
    let text = read_text_auto(&path, threshold)?;
    parse_subscriptions(&text, filter)
        .with_context(|| format!("parse subscriptions {}", path.as_ref().display()))
}

fn load_transactions<P: AsRef<Path>>(
    path: P,
    filter: &RowFilter,
    threshold: u64,
) -> Result<Loaded<TransactionRow>> {
    let text = read_text_auto(&path, threshold)?;
    parse_transactions(&text, filter)
        .with_context(|| format!("parse transactions {}", path.as_ref().display()))
}
