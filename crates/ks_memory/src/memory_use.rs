//! Process-level memory readings, to put the accounted numbers in context.

/// Resident-set size of this process, if the platform reports one.
///
/// This is what the OS sees; the accounted total is what the tracked
/// allocation paths saw. The gap between the two is untracked memory
/// (allocator slack, code paths that bypass the interceptor, …).
#[cfg(not(target_arch = "wasm32"))]
pub fn resident_memory() -> Option<u64> {
    memory_stats::memory_stats().map(|usage| usage.physical_mem as u64)
}

#[cfg(target_arch = "wasm32")]
pub fn resident_memory() -> Option<u64> {
    None
}
