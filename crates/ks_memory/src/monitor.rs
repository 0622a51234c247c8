//! The process-wide monitor: per-site counters plus the server totals, and
//! the global lifecycle (`initialize` → enabled → `finalize`).

#![allow(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool, AtomicU64,
    Ordering::{Acquire, Relaxed, Release},
};

use parking_lot::RwLock;

use crate::config::MonitorConfig;
use crate::fingerprint::with_fingerprint;
use crate::header::{AllocHeader, METAINFO_SIZE};
use crate::registry::{StatRegistry, sub_saturating};
use crate::report::ServerInfo;

/// Accounting state for one server process.
///
/// Normally accessed through the global singleton (see [`initialize`]), but
/// directly constructible so tests can run instances side by side.
pub struct MemoryMonitor {
    server_name: String,
    registry: StatRegistry,

    /// Sum of recorded sizes of all live tracked allocations.
    total_current: AtomicU64,

    /// High water mark of `total_current`.
    total_peak: AtomicU64,

    /// Bookkeeping overhead: one header per live tracked allocation.
    total_metainfo: AtomicU64,
}

impl MemoryMonitor {
    pub fn new(server_name: &str) -> Self {
        Self::with_stat_capacity(server_name, crate::registry::MAX_NUM_STATS)
    }

    pub fn with_stat_capacity(server_name: &str, capacity: usize) -> Self {
        Self {
            server_name: server_name.to_owned(),
            registry: StatRegistry::with_capacity(capacity),
            total_current: AtomicU64::new(0),
            total_peak: AtomicU64::new(0),
            total_metainfo: AtomicU64::new(0),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Direct access to the per-site counter slots.
    pub fn registry(&self) -> &StatRegistry {
        &self.registry
    }

    pub fn total_current(&self) -> u64 {
        self.total_current.load(Relaxed)
    }

    pub fn total_peak(&self) -> u64 {
        self.total_peak.load(Relaxed)
    }

    pub fn total_metainfo(&self) -> u64 {
        self.total_metainfo.load(Relaxed)
    }

    /// Attribute a freshly allocated base block to the call site and stamp
    /// its header. Returns the payload pointer to hand to the caller.
    ///
    /// `recorded_size` is the platform-reported usable size of the whole
    /// block; it is what gets added now and subtracted again on free.
    ///
    /// If the registry is full the block still gets a (sentinel) header so
    /// the free path can recover the base pointer, but no counter moves: the
    /// allocation succeeds unaccounted.
    ///
    /// # Safety
    /// `base` must point at the start of a live block of at least
    /// `METAINFO_SIZE` writable bytes that the caller owns.
    pub unsafe fn add_stat(
        &self,
        base: *mut u8,
        recorded_size: u64,
        file: &str,
        line: u32,
    ) -> *mut u8 {
        let stat_id = with_fingerprint(file, line, |fp| self.registry.resolve(fp));

        // SAFETY: per this function's contract.
        unsafe { AllocHeader::new(stat_id, recorded_size).write_to(base) };

        if let Some(slot) = self.registry.slot(stat_id) {
            slot.add(recorded_size);
            let new_total = self.total_current.fetch_add(recorded_size, Relaxed) + recorded_size;
            self.total_peak.fetch_max(new_total, Relaxed);
            self.total_metainfo
                .fetch_add(METAINFO_SIZE as u64, Relaxed);
        }

        // SAFETY: per this function's contract.
        unsafe { AllocHeader::payload_of(base) }
    }

    /// Undo the attribution of `ptr` and consume its header.
    ///
    /// Returns the pointer to hand to the platform `free`: the base pointer
    /// for tracked blocks (magic matched, now scrubbed), or `ptr` unchanged
    /// for untracked ones. Counters move only for tracked, attributed
    /// blocks.
    ///
    /// # Safety
    /// `ptr` must be a payload pointer previously returned by
    /// [`Self::add_stat`] (or the tracked allocation entry points), or a
    /// pointer obtained from the bare platform allocator. Either way the
    /// block must still be live.
    pub unsafe fn sub_stat(&self, ptr: *mut u8) -> *mut u8 {
        // SAFETY: per this function's contract.
        let Some(header) = (unsafe { AllocHeader::peek(ptr) }) else {
            return ptr;
        };

        if let Some(slot) = self.registry.slot(header.stat_id()) {
            slot.sub(header.recorded_size());
            sub_saturating(&self.total_current, header.recorded_size(), "total");
            sub_saturating(&self.total_metainfo, METAINFO_SIZE as u64, "metainfo");
        }

        // SAFETY: the magic just matched, so `ptr` is a live tracked payload.
        unsafe { AllocHeader::consume(ptr) }
    }

    /// Snapshot the current accounting state.
    ///
    /// Safe to call concurrently with allocation traffic. Each counter is
    /// read atomically, but distinct counters may reflect different
    /// instants; in particular the total and the per-stat sum can disagree
    /// while traffic is in flight.
    pub fn aggregate_server_info(&self) -> ServerInfo {
        ServerInfo {
            server_name: self.server_name.clone(),
            total_mem_usage: self.total_current(),
            total_peak_mem_usage: self.total_peak(),
            total_metainfo_mem_usage: self.total_metainfo(),
            num_stats: self.registry.num_stats(),
            stat_info: self
                .registry
                .iter()
                .map(|slot| (slot.fingerprint().to_owned(), slot.current()))
                .collect(),
            resident_bytes: crate::memory_use::resident_memory(),
        }
    }
}

// ----------------------------------------------------------------------------
// Global lifecycle.

static ENABLED: AtomicBool = AtomicBool::new(false);
static MONITOR: RwLock<Option<Arc<MemoryMonitor>>> = RwLock::new(None);

/// Install the process-wide monitor, if the configuration asks for one.
///
/// Idempotent: once a monitor is installed, later calls keep the first
/// instance and only warn.
pub fn initialize(server_name: &str, config: &MonitorConfig) {
    if !config.enabled {
        return;
    }

    let mut slot = MONITOR.write();
    if slot.is_some() {
        log_once::warn_once!("memory accounting is already initialized; keeping the first monitor");
        return;
    }

    *slot = Some(Arc::new(MemoryMonitor::new(server_name)));
    ENABLED.store(true, Release);
    log::debug!("memory accounting enabled for {server_name:?}");
}

/// Tear the process-wide monitor down. Subsequent allocations go untracked.
///
/// In debug builds, dumps all buckets that still hold memory, as a leak
/// signal.
pub fn finalize() {
    let monitor = {
        let mut slot = MONITOR.write();
        ENABLED.store(false, Release);
        slot.take()
    };

    if let Some(monitor) = monitor {
        if cfg!(debug_assertions) {
            crate::report::log_outstanding_stats(&monitor);
        }
        log::debug!("memory accounting finalized for {:?}", monitor.server_name());
    }
}

/// Whether the process-wide monitor is installed and accounting.
pub fn is_enabled() -> bool {
    ENABLED.load(Acquire)
}

/// The installed monitor, if any.
pub(crate) fn global() -> Option<Arc<MemoryMonitor>> {
    if !is_enabled() {
        return None;
    }
    MONITOR.read().clone()
}

/// Snapshot the process-wide accounting state.
///
/// With no monitor installed this returns an empty, all-zero report, which
/// is also what the operator sees when accounting is configured off.
pub fn aggregate_server_info() -> ServerInfo {
    match global() {
        Some(monitor) => monitor.aggregate_server_info(),
        None => ServerInfo::default(),
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::METAINFO_SIZE;

    // A stand-in for a platform block, big enough for a header + payload.
    fn base_block() -> Box<[u64; 16]> {
        Box::new([0_u64; 16])
    }

    #[test]
    fn add_and_sub_move_every_total() {
        let monitor = MemoryMonitor::new("unittest");
        let mut block = base_block();
        let size = size_of_val(&*block) as u64;

        let payload = unsafe {
            monitor.add_stat(block.as_mut_ptr().cast(), size, "/src/heap_file.c", 120)
        };

        assert_eq!(monitor.total_current(), size);
        assert_eq!(monitor.total_peak(), size);
        assert_eq!(monitor.total_metainfo(), METAINFO_SIZE as u64);

        let returned = unsafe { monitor.sub_stat(payload) };
        assert_eq!(returned, block.as_mut_ptr().cast());

        assert_eq!(monitor.total_current(), 0);
        assert_eq!(monitor.total_peak(), size, "peak survives the free");
        assert_eq!(monitor.total_metainfo(), 0);
    }

    #[test]
    fn same_site_via_different_roots_collapses_to_one_bucket() {
        let monitor = MemoryMonitor::new("unittest");
        let (mut a, mut b) = (base_block(), base_block());

        unsafe {
            monitor.add_stat(a.as_mut_ptr().cast(), 64, "/src/add_test.c", 100);
            monitor.add_stat(
                b.as_mut_ptr().cast(),
                32,
                "/src/something/thirdparty/src/add_test.c",
                100,
            );
        }

        let info = monitor.aggregate_server_info();
        assert_eq!(info.num_stats, 1);
        assert_eq!(info.find_stat("add_test.c:100"), Some(64 + 32));
    }

    #[test]
    fn sub_stat_passes_untracked_pointers_through() {
        let monitor = MemoryMonitor::new("unittest");
        let mut block = base_block();
        block[0] = 0x1122_3344_5566_7788; // no magic
        let ptr: *mut u8 = unsafe { block.as_mut_ptr().cast::<u8>().add(METAINFO_SIZE) };

        let returned = unsafe { monitor.sub_stat(ptr) };
        assert_eq!(returned, ptr);
        assert_eq!(monitor.total_current(), 0);
    }

    #[test]
    fn exhausted_registry_stamps_but_does_not_account() {
        let monitor = MemoryMonitor::with_stat_capacity("unittest", 1);
        let (mut a, mut b) = (base_block(), base_block());

        unsafe {
            monitor.add_stat(a.as_mut_ptr().cast(), 64, "/src/first.c", 1);
        }
        assert_eq!(monitor.total_current(), 64);

        // Second site overflows the table: header written, nothing counted.
        let payload =
            unsafe { monitor.add_stat(b.as_mut_ptr().cast(), 32, "/src/second.c", 2) };
        assert_eq!(monitor.total_current(), 64);
        assert_eq!(monitor.total_metainfo(), METAINFO_SIZE as u64);

        // The sentinel header still recovers the base pointer on free.
        let returned = unsafe { monitor.sub_stat(payload) };
        assert_eq!(returned, b.as_mut_ptr().cast());
        assert_eq!(monitor.total_current(), 64);
    }

    #[test]
    fn aggregate_lists_stats_in_registration_order() {
        let monitor = MemoryMonitor::new("unittest");
        let (mut a, mut b, mut c) = (base_block(), base_block(), base_block());

        unsafe {
            monitor.add_stat(a.as_mut_ptr().cast(), 10, "x.c", 1);
            monitor.add_stat(b.as_mut_ptr().cast(), 20, "y.c", 2);
            monitor.add_stat(c.as_mut_ptr().cast(), 30, "x.c", 1);
        }

        let info = monitor.aggregate_server_info();
        assert_eq!(info.server_name, "unittest");
        assert_eq!(info.num_stats, 2);
        assert_eq!(
            info.stat_info,
            vec![("x.c:1".to_owned(), 40), ("y.c:2".to_owned(), 20)]
        );
        assert_eq!(info.total_mem_usage, 60);
    }
}
