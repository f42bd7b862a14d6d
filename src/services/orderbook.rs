//! Order-book synchronizer: snapshot + diff consistency protocol.
//!
//! The live diff stream and the REST snapshot are produced at arbitrary
//! points relative to each other, so diffs are cached first, the snapshot is
//! loaded on top, and the cached range bridging the snapshot id is replayed.
//! Once synced, a sequence gap (`U > last_update_id + 1`) means updates were
//! lost on the wire and the whole book is rebuilt from scratch.
//!
//! Protocol anomalies never escape as errors: the caller gets an
//! [`IngestOutcome`] and owns the actual snapshot refetch (it is an async
//! REST call; diffs keep being cached while it is outstanding).

use std::collections::VecDeque;

use chrono::Utc;
use log::{debug, error, warn};

use crate::utils::types::{BookStats, OrderBook, OrderBookDiff, PriceLevel};

/// Cached diffs beyond this bound are treated as a fatal desync.
pub const DIFF_QUEUE_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Caching,
    Synced,
}

/// Allowed-transition table. Everything funnels through `Unsynced` when
/// consistency is lost.
fn transition_allowed(from: SyncState, to: SyncState) -> bool {
    use SyncState::*;
    matches!(
        (from, to),
        (Unsynced, Caching) | (Caching, Synced) | (Caching, Unsynced) | (Synced, Unsynced)
    )
}

/// What happened to a diff handed to [`OrderBookSynchronizer::ingest_diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not collecting yet; the diff was dropped.
    Dropped,
    /// Queued while waiting for a snapshot.
    Cached,
    /// Applied to the synced book.
    Applied,
    /// `u ≤ last_update_id`, already reflected. No-op.
    Stale,
    /// Gap or overflow detected. State is back to Caching; the caller must
    /// fetch a fresh snapshot.
    Resync,
}

pub struct OrderBookSynchronizer {
    symbol: String,
    depth: usize,
    state: SyncState,
    book: Option<OrderBook>,
    pending: VecDeque<OrderBookDiff>,
}

impl OrderBookSynchronizer {
    pub fn new(symbol: impl Into<String>, depth: usize) -> Self {
        Self {
            symbol: symbol.into(),
            depth: depth.max(1),
            state: SyncState::Unsynced,
            book: None,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The current book, regardless of sync state. Prefer the accessors
    /// below, which return `None` until synchronized.
    pub fn book(&self) -> Option<&OrderBook> {
        self.book.as_ref()
    }

    fn set_state(&mut self, to: SyncState) {
        if self.state == to {
            return;
        }
        if !transition_allowed(self.state, to) {
            error!(
                "{}: refusing invalid sync transition {:?} -> {:?}",
                self.symbol, self.state, to
            );
            return;
        }
        debug!("{}: sync {:?} -> {:?}", self.symbol, self.state, to);
        self.state = to;
    }

    /// Drop all state and start collecting diffs for a fresh snapshot.
    pub fn start_caching(&mut self) {
        self.book = None;
        self.pending.clear();
        self.set_state(SyncState::Unsynced);
        self.set_state(SyncState::Caching);
    }

    /// Feed one live diff, in wire order.
    pub fn ingest_diff(&mut self, diff: OrderBookDiff) -> IngestOutcome {
        match self.state {
            SyncState::Unsynced => IngestOutcome::Dropped,
            SyncState::Caching => {
                if self.pending.len() >= DIFF_QUEUE_CAP {
                    warn!(
                        "{}: diff queue overflow at {} entries, forcing resync",
                        self.symbol,
                        self.pending.len()
                    );
                    self.start_caching();
                    return IngestOutcome::Resync;
                }
                self.pending.push_back(diff);
                IngestOutcome::Cached
            }
            SyncState::Synced => {
                let last = self.book.as_ref().map_or(0, |b| b.last_update_id);
                if diff.last_update_id <= last {
                    return IngestOutcome::Stale;
                }
                if diff.first_update_id > last + 1 {
                    warn!(
                        "{}: sequence gap (expected {}, got {}), resyncing",
                        self.symbol,
                        last + 1,
                        diff.first_update_id
                    );
                    self.start_caching();
                    return IngestOutcome::Resync;
                }
                self.apply(diff);
                IngestOutcome::Applied
            }
        }
    }

    /// Install a REST snapshot carrying sequence id `base_id` and replay the
    /// cached diffs that bridge it. Returns `false` when the cached stream
    /// cannot bridge the snapshot (a hole inside the cache) — state is back
    /// to Caching and the caller should fetch again.
    pub fn load_snapshot(
        &mut self,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        base_id: u64,
    ) -> bool {
        if self.state != SyncState::Caching {
            warn!(
                "{}: snapshot ignored in state {:?}",
                self.symbol, self.state
            );
            return false;
        }

        let mut book = OrderBook {
            symbol: self.symbol.clone(),
            last_update_id: base_id,
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: Utc::now().timestamp_millis(),
        };
        // snapshots arrive sorted, but nothing downstream should depend on
        // the exchange honoring that
        apply_side(&mut book.bids, &bids, true, self.depth);
        apply_side(&mut book.asks, &asks, false, self.depth);
        self.book = Some(book);

        let cached: Vec<OrderBookDiff> = self.pending.drain(..).collect();
        let total = cached.len();
        let mut applied = 0usize;
        for diff in cached {
            let last = self.book.as_ref().map_or(0, |b| b.last_update_id);
            if diff.last_update_id <= last {
                // entirely covered by the snapshot
                continue;
            }
            if diff.first_update_id > last + 1 {
                // hole inside the cached range; the snapshot cannot bridge it
                warn!(
                    "{}: cached diffs do not bridge snapshot id {} (next diff starts at {}), refetching",
                    self.symbol, base_id, diff.first_update_id
                );
                self.start_caching();
                return false;
            }
            self.apply(diff);
            applied += 1;
        }

        self.set_state(SyncState::Synced);
        debug!(
            "{}: synced at id {} ({} of {} cached diffs replayed)",
            self.symbol,
            self.book.as_ref().map_or(base_id, |b| b.last_update_id),
            applied,
            total
        );
        true
    }

    fn apply(&mut self, diff: OrderBookDiff) {
        let depth = self.depth;
        let Some(book) = self.book.as_mut() else {
            return;
        };
        apply_side(&mut book.bids, &diff.bids, true, depth);
        apply_side(&mut book.asks, &diff.asks, false, depth);
        book.last_update_id = diff.last_update_id;
        book.timestamp = diff.timestamp;
    }

    fn synced_book(&self) -> Option<&OrderBook> {
        if self.state == SyncState::Synced {
            self.book.as_ref()
        } else {
            None
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.synced_book()?.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.synced_book()?.asks.first().copied()
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn mid_price(&self) -> Option<f64> {
        Some((self.best_ask()?.price + self.best_bid()?.price) / 2.0)
    }

    /// Summed notional (price × amount) over the top `n` levels per side:
    /// `(bid_notional, ask_notional)`.
    pub fn notional_volume(&self, n: usize) -> Option<(f64, f64)> {
        let book = self.synced_book()?;
        let sum = |side: &[PriceLevel]| {
            side.iter()
                .take(n)
                .map(|l| l.price * l.amount)
                .sum::<f64>()
        };
        Some((sum(&book.bids), sum(&book.asks)))
    }

    /// Bid/ask percentage split of the top-`n` notional:
    /// `(bid_percent, ask_percent)`.
    pub fn volume_split(&self, n: usize) -> Option<(f64, f64)> {
        let (bid, ask) = self.notional_volume(n)?;
        let total = bid + ask;
        if total == 0.0 {
            return Some((0.0, 0.0));
        }
        Some((bid / total * 100.0, ask / total * 100.0))
    }

    /// Derived view for downstream publication over the top `n` levels.
    pub fn stats(&self, n: usize) -> Option<BookStats> {
        let (bid_volume, ask_volume) = self.notional_volume(n)?;
        let (bid_percent, ask_percent) = self.volume_split(n)?;
        Some(BookStats {
            ask_volume,
            bid_volume,
            ask_percent,
            bid_percent,
            spread: self.spread(),
            mid_price: self.mid_price(),
        })
    }
}

/// Merge diff levels into one sorted, unique-price, depth-bounded side.
fn apply_side(side: &mut Vec<PriceLevel>, updates: &[PriceLevel], descending: bool, depth: usize) {
    for level in updates {
        if level.is_tombstone() {
            if let Some(i) = side.iter().position(|l| l.price == level.price) {
                side.remove(i);
            }
            continue;
        }
        match side.iter().position(|l| l.price == level.price) {
            Some(i) => side[i].amount = level.amount,
            None => {
                let at = side.partition_point(|l| {
                    if descending {
                        l.price > level.price
                    } else {
                        l.price < level.price
                    }
                });
                side.insert(at, *level);
            }
        }
    }
    side.truncate(depth);
}
