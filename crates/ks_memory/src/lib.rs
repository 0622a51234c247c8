//! Run-time memory accounting for the Keystone server.
//!
//! Every heap allocation made through the tracked entry points is attributed
//! to a bucket named after its call site (`<basename>:<line>`), so operators
//! can ask a running server where its memory went:
//!
//! * [`initialize`] / [`finalize`] manage the process-wide monitor;
//! * [`tracked_alloc`], [`tracked_calloc`], [`tracked_realloc`],
//!   [`tracked_free`] and [`tracked_strdup`] wrap the platform allocation
//!   primitives (see also the [`track_alloc!`] macro family);
//! * [`aggregate_server_info`] snapshots per-site and process-wide usage
//!   into a [`ServerInfo`] report.
//!
//! Accounting is best-effort by design: a failure to attribute an
//! allocation never fails the allocation itself. With the monitor disabled
//! every entry point forwards to libc with nothing but a branch on top.
//!
//! Tracked blocks carry a small header in front of their payload; the
//! report's `total_metainfo_mem_usage` says how much memory that
//! bookkeeping itself is holding.

mod config;
mod fingerprint;
mod header;
mod memory_use;
mod monitor;
mod registry;
mod report;
mod tracked_alloc;

pub use self::config::MonitorConfig;
pub use self::header::METAINFO_SIZE;
pub use self::memory_use::resident_memory;
pub use self::monitor::{
    MemoryMonitor, aggregate_server_info, finalize, initialize, is_enabled,
};
pub use self::registry::{MAX_NUM_STATS, StatId, StatRegistry, StatSlot};
pub use self::report::ServerInfo;
pub use self::tracked_alloc::{
    get_allocated_size, tracked_alloc, tracked_calloc, tracked_free, tracked_realloc,
    tracked_strdup,
};
