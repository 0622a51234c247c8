//! The fingerprint registry and its per-stat counter slots.
//!
//! The registry hands out dense [`StatId`]s in registration order. Slots are
//! preallocated, so once an id has been handed out the counter updates index
//! straight into the table with no locking; only the first sighting of a new
//! fingerprint takes the append lock.

use std::sync::atomic::{
    AtomicU32, AtomicU64,
    Ordering::{Acquire, Relaxed, Release},
};

use ahash::{HashMap, HashMapExt as _};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

/// How many distinct allocation sites the registry can hold.
///
/// The number of call sites is bounded by the source code, not the workload,
/// so a fixed table is plenty; running out downgrades accounting to
/// best-effort rather than failing the allocation.
pub const MAX_NUM_STATS: usize = 4096;

// ----------------------------------------------------------------------------

/// Dense handle for one allocation-site bucket.
///
/// Assigned in registration order, never reused, valid for the remainder of
/// the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StatId(u32);

impl StatId {
    /// The "no stat" sentinel: carried by allocations that could not be
    /// attributed (registry full).
    pub const NONE: Self = Self(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub(crate) fn as_raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

// ----------------------------------------------------------------------------

/// Counters for one allocation-site bucket.
///
/// `current` tracks the recorded sizes of live allocations, `peak` the high
/// water mark of `current`, and `alloc_count` the lifetime number of
/// allocations (never decremented).
pub struct StatSlot {
    fingerprint: OnceCell<String>,
    current: AtomicU64,
    peak: AtomicU64,
    alloc_count: AtomicU64,
}

impl StatSlot {
    const fn empty() -> Self {
        Self {
            fingerprint: OnceCell::new(),
            current: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            alloc_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn add(&self, size: u64) {
        let new_current = self.current.fetch_add(size, Relaxed) + size;
        self.peak.fetch_max(new_current, Relaxed);
        self.alloc_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn sub(&self, size: u64) {
        sub_saturating(&self.current, size, self.fingerprint());
    }

    pub fn fingerprint(&self) -> &str {
        // Set before the id is published, so always present on a live slot.
        self.fingerprint.get().map_or("", String::as_str)
    }

    pub fn current(&self) -> u64 {
        self.current.load(Relaxed)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Relaxed)
    }

    pub fn alloc_count(&self) -> u64 {
        self.alloc_count.load(Relaxed)
    }
}

/// Subtract `size` from `counter`, clamping at zero.
///
/// Going below zero means a tracked free was paired with an add it never had,
/// i.e. a header was corrupted or a foreign block forged the magic. Debug
/// builds treat it as the bug it is; release builds clamp and keep serving.
pub(crate) fn sub_saturating(counter: &AtomicU64, size: u64, what: &str) {
    if counter
        .fetch_update(Relaxed, Relaxed, |current| current.checked_sub(size))
        .is_err()
    {
        debug_assert!(false, "memory counter underflow for {what:?} (sub {size})");
        log::error!("memory counter underflow for {what:?} (sub {size}); clamping to zero");
        counter.store(0, Relaxed);
    }
}

// ----------------------------------------------------------------------------

/// Append-only mapping from fingerprint to [`StatId`], plus the counter
/// table the ids index into.
pub struct StatRegistry {
    slots: Box<[StatSlot]>,

    /// Number of slots handed out so far. `Release`-published after the slot
    /// fingerprint is in place.
    num_stats: AtomicU32,

    index: RwLock<HashMap<String, StatId>>,

    /// Serializes first-time registrations. Lookups of known fingerprints
    /// never touch it.
    append_lock: Mutex<()>,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_NUM_STATS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, StatSlot::empty);
        Self {
            slots: slots.into_boxed_slice(),
            num_stats: AtomicU32::new(0),
            index: RwLock::new(HashMap::new()),
            append_lock: Mutex::new(()),
        }
    }

    /// Look up the id for `fingerprint`, registering it on first use.
    ///
    /// Idempotent: concurrent first-time registrations of the same
    /// fingerprint agree on a single id. Returns [`StatId::NONE`] when the
    /// table is full.
    pub fn resolve(&self, fingerprint: &str) -> StatId {
        if let Some(&id) = self.index.read().get(fingerprint) {
            return id;
        }
        self.register(fingerprint)
    }

    #[cold]
    fn register(&self, fingerprint: &str) -> StatId {
        let _append = self.append_lock.lock();

        // Double-check: someone may have registered it while we waited.
        if let Some(&id) = self.index.read().get(fingerprint) {
            return id;
        }

        let next = self.num_stats.load(Relaxed) as usize;
        if next >= self.slots.len() {
            log_once::warn_once!(
                "stat registry is full ({} sites); further sites go unaccounted",
                self.slots.len()
            );
            return StatId::NONE;
        }

        let id = StatId::from_raw(next as u32);
        let stored = self.slots[next].fingerprint.set(fingerprint.to_owned());
        debug_assert!(stored.is_ok(), "slot {next} initialized twice");

        self.index.write().insert(fingerprint.to_owned(), id);
        self.num_stats.store(next as u32 + 1, Release);
        id
    }

    /// The slot behind `id`, or `None` for the sentinel.
    pub fn slot(&self, id: StatId) -> Option<&StatSlot> {
        if id.is_none() {
            return None;
        }
        self.slots.get(id.index())
    }

    /// Number of registered allocation sites.
    pub fn num_stats(&self) -> usize {
        self.num_stats.load(Acquire) as usize
    }

    /// All registered slots, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &StatSlot> {
        self.slots[..self.num_stats()].iter()
    }
}

impl Default for StatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
