//! L2 order-book reconstruction.
//!
//! One book per (venue, symbol), built by merging a REST snapshot with
//! streaming deltas under sequence-gap detection. A gap discards the
//! delta and queues a snapshot refetch; fetches run on the recovery
//! thread so the parser thread never blocks on HTTP.
//!
//! Invariants held under the book lock: every stored size is strictly
//! positive; `last_sequence` never decreases except across a snapshot
//! install; a crossed book (best bid >= best ask) forces a resync.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use market_core::{BookUpdate, BookUpdateKind, FeedStats, PriceLevel, QualifiedSymbol, VenueId};

use crate::bus::EventBus;
use crate::rest::{BookSnapshot, SnapshotFetcher};

type BidSide = BTreeMap<Reverse<OrderedFloat<f64>>, f64>;
type AskSide = BTreeMap<OrderedFloat<f64>, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// Waiting for a REST snapshot; deltas are dropped meanwhile.
    AwaitingSnapshot,
    /// Book installed from a WS snapshot that carried no sequence; the
    /// next sequenced delta supplies the baseline as `sequence - 1`.
    PendingBaseline,
    Synced,
}

struct BookState {
    bids: BidSide,
    asks: AskSide,
    last_sequence: i64,
    sync: SyncState,
}

impl BookState {
    fn awaiting() -> Self {
        BookState {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence: 0,
            sync: SyncState::AwaitingSnapshot,
        }
    }

    fn install(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], sequence: i64, sync: SyncState) {
        self.bids.clear();
        self.asks.clear();
        for &(price, size) in bids {
            if size > 0.0 {
                self.bids.insert(Reverse(OrderedFloat(price)), size);
            }
        }
        for &(price, size) in asks {
            if size > 0.0 {
                self.asks.insert(OrderedFloat(price), size);
            }
        }
        self.last_sequence = sequence;
        self.sync = sync;
    }

    fn apply_levels(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        for &(price, size) in bids {
            if size == 0.0 {
                self.bids.remove(&Reverse(OrderedFloat(price)));
            } else {
                self.bids.insert(Reverse(OrderedFloat(price)), size);
            }
        }
        for &(price, size) in asks {
            if size == 0.0 {
                self.asks.remove(&OrderedFloat(price));
            } else {
                self.asks.insert(OrderedFloat(price), size);
            }
        }
    }

    fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.iter().next().map(|(p, &s)| (p.0 .0, s))
    }

    fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, &s)| (p.0, s))
    }

    fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }
}

/// Reconstructed books for all venues, plus the snapshot recovery queue.
pub struct BookManager {
    books: Mutex<HashMap<QualifiedSymbol, BookState>>,
    fetchers: Mutex<HashMap<VenueId, Arc<dyn SnapshotFetcher>>>,
    pending: Mutex<PendingQueue>,
    stats: Arc<FeedStats>,
}

struct PendingQueue {
    queue: VecDeque<QualifiedSymbol>,
    in_queue: HashSet<QualifiedSymbol>,
}

impl BookManager {
    pub fn new(stats: Arc<FeedStats>) -> Self {
        BookManager {
            books: Mutex::new(HashMap::new()),
            fetchers: Mutex::new(HashMap::new()),
            pending: Mutex::new(PendingQueue {
                queue: VecDeque::new(),
                in_queue: HashSet::new(),
            }),
            stats,
        }
    }

    /// Register the REST snapshot source for a venue. Venues without a
    /// fetcher rely on WS snapshot frames alone.
    pub fn register_fetcher(&self, venue: VenueId, fetcher: Arc<dyn SnapshotFetcher>) {
        self.fetchers.lock().insert(venue, fetcher);
    }

    /// Subscribe the manager to book updates on the bus.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let manager = Arc::clone(self);
        bus.subscribe::<BookUpdate>(move |update| manager.apply(update));
    }

    pub fn apply(&self, update: &BookUpdate) {
        let key = QualifiedSymbol::new(update.venue, &update.symbol);
        match update.kind {
            BookUpdateKind::Snapshot => self.apply_ws_snapshot(&key, update),
            BookUpdateKind::Delta => self.apply_delta(&key, update),
        }
    }

    fn apply_ws_snapshot(&self, key: &QualifiedSymbol, update: &BookUpdate) {
        let mut books = self.books.lock();
        let state = books.entry(key.clone()).or_insert_with(BookState::awaiting);
        let sync = if update.sequence > 0 {
            SyncState::Synced
        } else {
            SyncState::PendingBaseline
        };
        state.install(&update.bids, &update.asks, update.sequence, sync);
    }

    fn apply_delta(&self, key: &QualifiedSymbol, update: &BookUpdate) {
        let mut resync = false;
        {
            let mut books = self.books.lock();
            let state = books.entry(key.clone()).or_insert_with(BookState::awaiting);

            match state.sync {
                SyncState::AwaitingSnapshot => {
                    resync = true;
                }
                SyncState::PendingBaseline => {
                    if update.sequence > 0 {
                        state.last_sequence = update.sequence - 1;
                        state.sync = SyncState::Synced;
                        resync = !self.apply_sequenced(state, key, update);
                    } else {
                        // Venue numbers nothing; apply without tracking.
                        state.apply_levels(&update.bids, &update.asks);
                        resync = self.check_consistency(state, key);
                    }
                }
                SyncState::Synced => {
                    if update.sequence == 0 {
                        state.apply_levels(&update.bids, &update.asks);
                        resync = self.check_consistency(state, key);
                    } else {
                        resync = !self.apply_sequenced(state, key, update);
                    }
                }
            }

            if resync {
                state.sync = SyncState::AwaitingSnapshot;
            }
        }

        if resync {
            self.request_snapshot(key.clone());
        }
    }

    /// Apply a sequenced delta. Returns false when the book must resync.
    fn apply_sequenced(&self, state: &mut BookState, key: &QualifiedSymbol, update: &BookUpdate) -> bool {
        if state.last_sequence == 0 {
            return false;
        }
        if update.sequence != state.last_sequence + 1 {
            self.stats.record_gap_recovery();
            tracing::warn!(
                book = %key,
                expected = state.last_sequence + 1,
                got = update.sequence,
                "sequence gap, dropping delta and queueing resync"
            );
            return false;
        }

        state.apply_levels(&update.bids, &update.asks);
        state.last_sequence = update.sequence;
        !self.check_consistency(state, key)
    }

    /// Returns true when the book is inconsistent and must resync.
    fn check_consistency(&self, state: &mut BookState, key: &QualifiedSymbol) -> bool {
        if state.is_crossed() {
            tracing::warn!(book = %key, "book crossed after apply, queueing resync");
            return true;
        }
        false
    }

    fn request_snapshot(&self, key: QualifiedSymbol) {
        if !self.fetchers.lock().contains_key(&key.venue) {
            tracing::debug!(book = %key, "no snapshot fetcher registered, waiting for WS snapshot");
            return;
        }
        let mut pending = self.pending.lock();
        if pending.in_queue.insert(key.clone()) {
            pending.queue.push_back(key);
        }
    }

    /// Drain the snapshot queue once, fetching and installing on the
    /// caller's thread. Failed fetches are requeued. Returns the number
    /// of snapshots installed.
    pub fn service_snapshots_once(&self) -> usize {
        let mut installed = 0;
        loop {
            let key = {
                let mut pending = self.pending.lock();
                match pending.queue.pop_front() {
                    Some(key) => {
                        pending.in_queue.remove(&key);
                        key
                    }
                    None => break,
                }
            };

            let fetcher = match self.fetchers.lock().get(&key.venue) {
                Some(f) => Arc::clone(f),
                None => continue,
            };

            match fetcher.fetch(&key.symbol) {
                Ok(snapshot) => {
                    self.install_rest_snapshot(&key, &snapshot);
                    installed += 1;
                }
                Err(err) => {
                    tracing::warn!(book = %key, error = %err, "snapshot fetch failed, requeueing");
                    let mut pending = self.pending.lock();
                    if pending.in_queue.insert(key.clone()) {
                        pending.queue.push_back(key);
                    }
                    break;
                }
            }
        }
        installed
    }

    fn install_rest_snapshot(&self, key: &QualifiedSymbol, snapshot: &BookSnapshot) {
        let mut books = self.books.lock();
        let state = books.entry(key.clone()).or_insert_with(BookState::awaiting);
        state.install(&snapshot.bids, &snapshot.asks, snapshot.sequence, SyncState::Synced);
        tracing::info!(book = %key, sequence = snapshot.sequence, "snapshot installed");
    }

    /// Spawn the recovery thread servicing snapshot refetches.
    pub fn spawn_recovery_thread(self: &Arc<Self>) -> RecoveryHandle {
        let manager = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("book-recovery".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    manager.service_snapshots_once();
                    std::thread::sleep(Duration::from_millis(50));
                }
            })
            .expect("spawn recovery thread");

        RecoveryHandle {
            stop,
            thread: Some(thread),
        }
    }

    /// Consistent copy of the top `depth` levels, bids descending and
    /// asks ascending, taken under the book lock.
    pub fn top_levels(
        &self,
        key: &QualifiedSymbol,
        depth: usize,
    ) -> Option<(Vec<PriceLevel>, Vec<PriceLevel>)> {
        let books = self.books.lock();
        let state = books.get(key)?;
        let bids = state.bids.iter().take(depth).map(|(p, &s)| (p.0 .0, s)).collect();
        let asks = state.asks.iter().take(depth).map(|(p, &s)| (p.0, s)).collect();
        Some((bids, asks))
    }

    pub fn best_bid(&self, key: &QualifiedSymbol) -> Option<PriceLevel> {
        self.books.lock().get(key)?.best_bid()
    }

    pub fn best_ask(&self, key: &QualifiedSymbol) -> Option<PriceLevel> {
        self.books.lock().get(key)?.best_ask()
    }

    pub fn last_sequence(&self, key: &QualifiedSymbol) -> Option<i64> {
        self.books.lock().get(key).map(|s| s.last_sequence)
    }

    pub fn is_synced(&self, key: &QualifiedSymbol) -> bool {
        self.books
            .lock()
            .get(key)
            .map(|s| s.sync != SyncState::AwaitingSnapshot)
            .unwrap_or(false)
    }
}

/// Handle to the recovery thread; stops and joins on `stop`.
pub struct RecoveryHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RecoveryHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use market_core::VenueId;

    struct QueuedFetcher {
        snapshots: Mutex<VecDeque<BookSnapshot>>,
        fetches: std::sync::atomic::AtomicUsize,
    }

    impl QueuedFetcher {
        fn new(snapshots: Vec<BookSnapshot>) -> Arc<Self> {
            Arc::new(QueuedFetcher {
                snapshots: Mutex::new(snapshots.into()),
                fetches: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::Relaxed)
        }
    }

    impl SnapshotFetcher for QueuedFetcher {
        fn fetch(&self, _symbol: &str) -> Result<BookSnapshot, SnapshotError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            self.snapshots
                .lock()
                .pop_front()
                .ok_or_else(|| SnapshotError::Malformed("fetcher exhausted".into()))
        }
    }

    fn delta(sequence: i64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> BookUpdate {
        BookUpdate {
            venue: VenueId::Coinbase,
            symbol: "BTC-USD".to_string(),
            kind: BookUpdateKind::Delta,
            timestamp_ns: 0,
            sequence,
            bids,
            asks,
        }
    }

    fn key() -> QualifiedSymbol {
        QualifiedSymbol::new(VenueId::Coinbase, "BTC-USD")
    }

    fn assert_invariants(manager: &BookManager, key: &QualifiedSymbol) {
        let books = manager.books.lock();
        let state = books.get(key).unwrap();
        for (&price, &size) in state.asks.iter() {
            assert!(size > 0.0, "zero-size ask at {}", price.0);
        }
        for (price, &size) in state.bids.iter() {
            assert!(size > 0.0, "zero-size bid at {}", price.0 .0);
        }
        assert!(!state.is_crossed());
    }

    #[test]
    fn test_sequence_gap_forces_refetch_then_resumes() {
        let manager = BookManager::new(Arc::new(FeedStats::new()));
        let fetcher = QueuedFetcher::new(vec![
            BookSnapshot {
                sequence: 100,
                bids: vec![(100.0, 1.0)],
                asks: vec![(101.0, 1.0)],
            },
            BookSnapshot {
                sequence: 105,
                bids: vec![(100.0, 2.0)],
                asks: vec![(101.0, 2.0)],
            },
        ]);
        manager.register_fetcher(VenueId::Coinbase, fetcher.clone());

        // First delta for an unknown book queues the initial snapshot.
        manager.apply(&delta(99, vec![(100.0, 5.0)], vec![]));
        assert!(!manager.is_synced(&key()));
        assert_eq!(manager.service_snapshots_once(), 1);
        assert_eq!(manager.last_sequence(&key()), Some(100));

        // In-order delta applies.
        manager.apply(&delta(101, vec![(99.5, 3.0)], vec![]));
        assert_eq!(manager.last_sequence(&key()), Some(101));
        assert_invariants(&manager, &key());

        // Gap: 103 skips 102. The delta is discarded and a refetch queued.
        manager.apply(&delta(103, vec![(99.0, 4.0)], vec![]));
        assert_eq!(manager.last_sequence(&key()), Some(101));
        assert!(!manager.is_synced(&key()));

        assert_eq!(manager.service_snapshots_once(), 1);
        assert_eq!(manager.last_sequence(&key()), Some(105));
        assert_eq!(fetcher.fetch_count(), 2);

        // Next in-order delta applies cleanly.
        manager.apply(&delta(106, vec![], vec![(101.5, 1.0)]));
        assert_eq!(manager.last_sequence(&key()), Some(106));
        assert_invariants(&manager, &key());
        assert_eq!(manager.best_ask(&key()), Some((101.0, 2.0)));
    }

    #[test]
    fn test_deltas_apply_deterministically() {
        let make_manager = || {
            let manager = BookManager::new(Arc::new(FeedStats::new()));
            let fetcher = QueuedFetcher::new(vec![BookSnapshot {
                sequence: 10,
                bids: vec![(100.0, 1.0), (99.0, 2.0)],
                asks: vec![(101.0, 1.5)],
            }]);
            manager.register_fetcher(VenueId::Coinbase, fetcher);
            manager.apply(&delta(1, vec![], vec![]));
            manager.service_snapshots_once();
            manager
        };

        let deltas = [
            delta(11, vec![(100.0, 0.5)], vec![(101.0, 0.0), (102.0, 3.0)]),
            delta(12, vec![(99.0, 0.0)], vec![]),
            delta(13, vec![(100.5, 1.0)], vec![]),
        ];

        let a = make_manager();
        let b = make_manager();
        for d in &deltas {
            a.apply(d);
            b.apply(d);
        }

        let top_a = a.top_levels(&key(), 10).unwrap();
        let top_b = b.top_levels(&key(), 10).unwrap();
        assert_eq!(top_a, top_b);
        assert_eq!(top_a.0, vec![(100.5, 1.0), (100.0, 0.5)]);
        assert_eq!(top_a.1, vec![(102.0, 3.0)]);
        assert_eq!(a.last_sequence(&key()), Some(13));
        assert_invariants(&a, &key());
    }

    #[test]
    fn test_duplicate_price_in_one_delta_last_write_wins() {
        let manager = BookManager::new(Arc::new(FeedStats::new()));
        manager.apply(&BookUpdate {
            kind: BookUpdateKind::Snapshot,
            sequence: 5,
            ..delta(0, vec![(100.0, 1.0)], vec![(101.0, 1.0)])
        });

        manager.apply(&delta(6, vec![(100.0, 1.0), (100.0, 2.5)], vec![]));
        assert_eq!(manager.best_bid(&key()), Some((100.0, 2.5)));
    }

    #[test]
    fn test_delete_of_missing_level_is_noop() {
        let manager = BookManager::new(Arc::new(FeedStats::new()));
        manager.apply(&BookUpdate {
            kind: BookUpdateKind::Snapshot,
            sequence: 5,
            ..delta(0, vec![(100.0, 1.0)], vec![(101.0, 1.0)])
        });

        manager.apply(&delta(6, vec![(98.0, 0.0)], vec![]));
        assert_eq!(manager.last_sequence(&key()), Some(6));
        assert_eq!(manager.best_bid(&key()), Some((100.0, 1.0)));
    }

    #[test]
    fn test_ws_snapshot_without_sequence_adopts_next_delta_baseline() {
        let manager = BookManager::new(Arc::new(FeedStats::new()));
        manager.apply(&BookUpdate {
            kind: BookUpdateKind::Snapshot,
            sequence: 0,
            ..delta(0, vec![(100.0, 1.0)], vec![(101.0, 1.0)])
        });
        assert!(manager.is_synced(&key()));

        manager.apply(&delta(50, vec![(100.0, 2.0)], vec![]));
        assert_eq!(manager.last_sequence(&key()), Some(50));
        assert_eq!(manager.best_bid(&key()), Some((100.0, 2.0)));

        // And stays sequenced from there: a gap now forces a resync.
        manager.apply(&delta(52, vec![], vec![]));
        assert!(!manager.is_synced(&key()));
    }

    #[test]
    fn test_unsequenced_deltas_apply_without_gap_tracking() {
        let manager = BookManager::new(Arc::new(FeedStats::new()));
        let kraken = QualifiedSymbol::new(VenueId::Kraken, "BTC/USD");

        manager.apply(&BookUpdate {
            venue: VenueId::Kraken,
            symbol: "BTC/USD".to_string(),
            kind: BookUpdateKind::Snapshot,
            timestamp_ns: 0,
            sequence: 0,
            bids: vec![(100.0, 1.0)],
            asks: vec![(101.0, 1.0)],
        });

        manager.apply(&BookUpdate {
            venue: VenueId::Kraken,
            symbol: "BTC/USD".to_string(),
            kind: BookUpdateKind::Delta,
            timestamp_ns: 0,
            sequence: 0,
            bids: vec![(100.5, 2.0)],
            asks: vec![],
        });

        assert_eq!(manager.best_bid(&kraken), Some((100.5, 2.0)));
        assert!(manager.is_synced(&kraken));
    }

    #[test]
    fn test_crossed_book_marks_inconsistent_and_resyncs() {
        let manager = BookManager::new(Arc::new(FeedStats::new()));
        let fetcher = QueuedFetcher::new(vec![]);
        manager.register_fetcher(VenueId::Coinbase, fetcher.clone());

        manager.apply(&BookUpdate {
            kind: BookUpdateKind::Snapshot,
            sequence: 10,
            ..delta(0, vec![(100.0, 1.0)], vec![(101.0, 1.0)])
        });

        // A bid through the ask crosses the book.
        manager.apply(&delta(11, vec![(102.0, 1.0)], vec![]));
        assert!(!manager.is_synced(&key()));

        // The refetch was queued even though it will fail here.
        manager.service_snapshots_once();
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[test]
    fn test_gap_recovery_counter_increments() {
        let stats = Arc::new(FeedStats::new());
        let manager = BookManager::new(Arc::clone(&stats));
        manager.apply(&BookUpdate {
            kind: BookUpdateKind::Snapshot,
            sequence: 10,
            ..delta(0, vec![(100.0, 1.0)], vec![(101.0, 1.0)])
        });

        manager.apply(&delta(13, vec![], vec![]));
        assert_eq!(stats.snapshot().gap_recoveries, 1);
    }
}
