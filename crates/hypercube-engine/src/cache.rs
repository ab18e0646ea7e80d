use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use dashmap::DashMap;
use hypercube_model::{CellRequest, SegmentBody, SegmentHeader, SegmentRegion};

use crate::error::CacheError;

/// The boundary to the relational layer: fetch the raw aggregate data for a
/// segment region. Called by whichever query holds the fetch obligation for a
/// region; the index guarantees at most one such caller per conflicting
/// region at a time.
pub trait SegmentLoader: Send + Sync {
    fn load(&self, header: &SegmentHeader) -> Result<SegmentBody, CacheError>;
}

#[derive(Debug)]
enum SlotState {
    Waiting,
    Done(Result<Arc<SegmentBody>, CacheError>),
}

/// Shared resolution point for one in-flight load. Every joined waiter holds
/// an `Arc` to the same slot; publication wakes them all with the same
/// outcome.
#[derive(Debug)]
struct LoadSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl LoadSlot {
    fn new() -> Arc<Self> {
        Arc::new(LoadSlot {
            state: Mutex::new(SlotState::Waiting),
            cond: Condvar::new(),
        })
    }

    fn resolve(&self, outcome: Result<Arc<SegmentBody>, CacheError>) {
        let mut state = self.state.lock().expect("load slot lock poisoned");
        if matches!(*state, SlotState::Waiting) {
            *state = SlotState::Done(outcome);
            self.cond.notify_all();
        }
    }

    fn wait(&self) -> Result<Arc<SegmentBody>, CacheError> {
        let mut state = self.state.lock().expect("load slot lock poisoned");
        loop {
            match &*state {
                SlotState::Done(outcome) => return outcome.clone(),
                SlotState::Waiting => {
                    state = self
                        .cond
                        .wait(state)
                        .expect("load slot lock poisoned");
                }
            }
        }
    }

    fn try_get(&self) -> Option<Result<Arc<SegmentBody>, CacheError>> {
        let state = self.state.lock().expect("load slot lock poisoned");
        match &*state {
            SlotState::Done(outcome) => Some(outcome.clone()),
            SlotState::Waiting => None,
        }
    }
}

/// A handle on an in-flight (or already-resolved) segment load.
///
/// Blocking on [`LoadTicket::wait`] is the only intended suspension point in
/// the evaluation path. All tickets joined to the same load resolve with the
/// same outcome.
pub struct LoadTicket {
    slot: Arc<LoadSlot>,
}

impl LoadTicket {
    /// Block until the load resolves.
    pub fn wait(&self) -> Result<Arc<SegmentBody>, CacheError> {
        self.slot.wait()
    }

    /// Non-blocking probe; `None` while the load is still in flight.
    pub fn try_get(&self) -> Option<Result<Arc<SegmentBody>, CacheError>> {
        self.slot.try_get()
    }
}

/// Outcome of [`SegmentCacheIndex::request_load`].
pub enum LoadRequest {
    /// A ready segment already covers the requested region.
    Ready(Arc<SegmentBody>),
    /// An overlapping load is in flight; wait on the ticket.
    Joined(LoadTicket),
    /// The caller owns the fetch: perform it, report the outcome via
    /// `load_succeeded`/`load_failed`, then the ticket resolves.
    Fetch(LoadTicket),
}

#[derive(Debug, Clone)]
enum Entry {
    Pending {
        header: SegmentHeader,
        slot: Arc<LoadSlot>,
    },
    Ready {
        header: SegmentHeader,
        body: Arc<SegmentBody>,
    },
    Failed {
        header: SegmentHeader,
        error: CacheError,
    },
}

impl Entry {
    fn header(&self) -> &SegmentHeader {
        match self {
            Entry::Pending { header, .. }
            | Entry::Ready { header, .. }
            | Entry::Failed { header, .. } => header,
        }
    }
}

/// Monotonic counters describing index activity, for hosts and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered immediately from a ready segment.
    pub hits: u64,
    /// Requests that joined an in-flight overlapping load.
    pub joins: u64,
    /// Requests that started a new fetch.
    pub fetches: u64,
    /// Entries removed by invalidation or eviction.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    joins: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

/// The authoritative, concurrent record of which aggregate-data regions are
/// known, in flight, or resident.
///
/// State transitions for overlapping regions are decided under a single
/// decision lock, which is never held across fetch I/O: the fetch itself runs
/// on the requesting thread after `request_load` returns, so unrelated
/// regions load fully in parallel while conflicting ones collapse to one
/// fetch.
pub struct SegmentCacheIndex {
    entries: DashMap<SegmentRegion, Entry>,
    /// Serializes overlap decisions; guards transitions only, never I/O.
    decision: Mutex<()>,
    /// Pending loads whose region was invalidated mid-flight, keyed by the
    /// generation of the header that started them so a retry for the same
    /// region is never intercepted. They resolve their waiters on arrival but
    /// their results never re-enter the map.
    stale: Mutex<Vec<(u64, Arc<LoadSlot>)>>,
    stats: StatCounters,
}

impl SegmentCacheIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(SegmentCacheIndex {
            entries: DashMap::new(),
            decision: Mutex::new(()),
            stale: Mutex::new(Vec::new()),
            stats: StatCounters::default(),
        })
    }

    /// Resolve how `header`'s region gets its data.
    ///
    /// In order: a ready entry covering the region answers immediately; an
    /// overlapping pending entry is joined; otherwise a new pending entry is
    /// created and the caller owns the fetch. A failed entry for the same
    /// region is replaced by the new pending entry (retry); it is never
    /// silently treated as ready.
    pub fn request_load(&self, header: &SegmentHeader) -> LoadRequest {
        let _guard = self.decision.lock().expect("decision lock poisoned");
        let region = header.region();

        for entry in self.entries.iter() {
            if let Entry::Ready { header: h, body } = entry.value() {
                if h.region().covers(region) {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return LoadRequest::Ready(body.clone());
                }
            }
        }

        for entry in self.entries.iter() {
            if let Entry::Pending { header: h, slot } = entry.value() {
                if h.region().overlaps(region) {
                    self.stats.joins.fetch_add(1, Ordering::Relaxed);
                    return LoadRequest::Joined(LoadTicket { slot: slot.clone() });
                }
            }
        }

        let slot = LoadSlot::new();
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            region.clone(),
            Entry::Pending {
                header: header.clone(),
                slot: slot.clone(),
            },
        );
        LoadRequest::Fetch(LoadTicket { slot })
    }

    /// Publish `body` for `header`'s region and wake all joined waiters.
    ///
    /// Safe to call with no matching pending entry: an eagerly-pushed segment
    /// is simply upserted as ready. A load whose region was invalidated while
    /// in flight still resolves its waiters, but its body is discarded rather
    /// than re-entering the map with data known to be outdated.
    pub fn load_succeeded(&self, header: &SegmentHeader, body: SegmentBody) -> Arc<SegmentBody> {
        let body = Arc::new(body);
        let _guard = self.decision.lock().expect("decision lock poisoned");
        let region = header.region();

        if let Some(slot) = self.take_stale(header.generation()) {
            slot.resolve(Ok(body.clone()));
            return body;
        }

        let previous = self.entries.insert(
            region.clone(),
            Entry::Ready {
                header: header.clone(),
                body: body.clone(),
            },
        );
        if let Some(Entry::Pending { slot, .. }) = previous {
            slot.resolve(Ok(body.clone()));
        }
        body
    }

    /// Record a failed fetch and release all joined waiters with the error.
    /// A later `request_load` for the same region may retry.
    pub fn load_failed(&self, header: &SegmentHeader, error: CacheError) {
        let _guard = self.decision.lock().expect("decision lock poisoned");
        let region = header.region();

        if let Some(slot) = self.take_stale(header.generation()) {
            slot.resolve(Err(error));
            return;
        }

        let previous = self.entries.insert(
            region.clone(),
            Entry::Failed {
                header: header.clone(),
                error: error.clone(),
            },
        );
        if let Some(Entry::Pending { slot, .. }) = previous {
            slot.resolve(Err(error));
        }
    }

    /// Evict every entry whose header matches `predicate`, regardless of
    /// state. Pending loads for invalidated regions are moved aside so they
    /// can still resolve their waiters without re-entering the map.
    pub fn invalidate(&self, predicate: impl Fn(&SegmentHeader) -> bool) {
        let _guard = self.decision.lock().expect("decision lock poisoned");
        let doomed: Vec<SegmentRegion> = self
            .entries
            .iter()
            .filter(|e| predicate(e.value().header()))
            .map(|e| e.key().clone())
            .collect();
        for region in doomed {
            if let Some((_, entry)) = self.entries.remove(&region) {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                if let Entry::Pending { header, slot } = entry {
                    self.stale
                        .lock()
                        .expect("stale list lock poisoned")
                        .push((header.generation(), slot));
                }
            }
        }
    }

    /// Drop one ready entry under memory pressure. Bodies already handed out
    /// stay alive through their `Arc`s; only the index forgets them.
    pub fn evict(&self, region: &SegmentRegion) -> bool {
        let _guard = self.decision.lock().expect("decision lock poisoned");
        let evictable = matches!(
            self.entries.get(region).as_deref(),
            Some(Entry::Ready { .. })
        );
        if evictable && self.entries.remove(region).is_some() {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Every *ready* segment broad enough to answer `request`. Which
    /// candidate (or combination of candidates) to use is the caller's
    /// policy, not the index's.
    pub fn find_covering_segments(
        &self,
        request: &CellRequest,
    ) -> Vec<(SegmentHeader, Arc<SegmentBody>)> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Entry::Ready { header, body } if header.region().satisfies(request) => {
                    Some((header.clone(), body.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Default candidate policy: the covering segment constraining the fewest
    /// values (a crude "smallest" estimate).
    pub fn smallest_covering(
        &self,
        request: &CellRequest,
    ) -> Option<(SegmentHeader, Arc<SegmentBody>)> {
        self.find_covering_segments(request)
            .into_iter()
            .min_by_key(|(header, _)| header.region().constrained_value_count())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            joins: self.stats.joins.load(Ordering::Relaxed),
            fetches: self.stats.fetches.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take_stale(&self, generation: u64) -> Option<Arc<LoadSlot>> {
        let mut stale = self.stale.lock().expect("stale list lock poisoned");
        let i = stale.iter().position(|(g, _)| *g == generation)?;
        Some(stale.swap_remove(i).1)
    }
}
