//! The operator-facing snapshot of accounting state.

use itertools::Itertools as _;

use crate::monitor::MemoryMonitor;

/// Point-in-time accounting snapshot, as produced by
/// [`crate::aggregate_server_info`].
///
/// `stat_info` follows stat registration order and keeps zero-current
/// entries, so a bucket that drained back to zero is still visible. All
/// sizes are in bytes; the CLI renders kilobytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_name: String,

    /// Sum of recorded sizes of live tracked allocations.
    pub total_mem_usage: u64,

    /// High water mark of `total_mem_usage`.
    pub total_peak_mem_usage: u64,

    /// How much of the total is accounting overhead (headers).
    pub total_metainfo_mem_usage: u64,

    pub num_stats: usize,

    /// `(fingerprint, current bytes)` per allocation site.
    pub stat_info: Vec<(String, u64)>,

    /// Process RSS at snapshot time, if the platform reports one.
    pub resident_bytes: Option<u64>,
}

impl ServerInfo {
    /// Current bytes of the bucket named `fingerprint`, if registered.
    pub fn find_stat(&self, fingerprint: &str) -> Option<u64> {
        self.stat_info
            .iter()
            .find(|(name, _)| name == fingerprint)
            .map(|&(_, current)| current)
    }
}

impl std::fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "====== Memory usage for {} ======", self.server_name)?;
        writeln!(
            f,
            "total:    {}",
            ks_format::format_bytes(self.total_mem_usage)
        )?;
        writeln!(
            f,
            "peak:     {}",
            ks_format::format_bytes(self.total_peak_mem_usage)
        )?;
        writeln!(
            f,
            "overhead: {}",
            ks_format::format_bytes(self.total_metainfo_mem_usage)
        )?;
        if let Some(resident) = self.resident_bytes {
            writeln!(f, "resident: {}", ks_format::format_bytes(resident))?;
        }
        writeln!(f, "stats:    {}", ks_format::format_uint(self.num_stats as u64))?;
        for (fingerprint, current) in &self.stat_info {
            writeln!(
                f,
                "  {fingerprint}: {}",
                ks_format::format_bytes(*current)
            )?;
        }
        Ok(())
    }
}

/// Debug-build leak signal: log every bucket that still holds memory.
///
/// Called on finalize, when a quiesced server should have drained every
/// bucket back to zero.
pub(crate) fn log_outstanding_stats(monitor: &MemoryMonitor) {
    let outstanding = monitor
        .registry()
        .iter()
        .filter(|slot| slot.current() > 0)
        .sorted_by_key(|slot| std::cmp::Reverse(slot.current()))
        .collect_vec();

    if outstanding.is_empty() {
        log::debug!("all memory stats drained to zero at finalize");
        return;
    }

    log::debug!(
        "{} stat(s) still hold memory at finalize:",
        outstanding.len()
    );
    for slot in outstanding {
        log::debug!(
            "  {}: {} over {} allocation(s)",
            slot.fingerprint(),
            ks_format::format_bytes(slot.current()),
            ks_format::format_uint(slot.alloc_count()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_stat_matches_exactly() {
        let info = ServerInfo {
            stat_info: vec![("a.c:1".to_owned(), 10), ("a.c:12".to_owned(), 20)],
            ..Default::default()
        };
        assert_eq!(info.find_stat("a.c:1"), Some(10));
        assert_eq!(info.find_stat("a.c:12"), Some(20));
        assert_eq!(info.find_stat("a.c:2"), None);
    }

    #[test]
    fn display_lists_every_bucket() {
        let info = ServerInfo {
            server_name: "unittest".to_owned(),
            total_mem_usage: 2048,
            total_peak_mem_usage: 4096,
            total_metainfo_mem_usage: 32,
            num_stats: 2,
            stat_info: vec![("a.c:1".to_owned(), 2048), ("b.c:2".to_owned(), 0)],
            resident_bytes: None,
        };

        let rendered = info.to_string();
        assert!(rendered.contains("unittest"));
        assert!(rendered.contains("a.c:1"));
        assert!(rendered.contains("b.c:2"), "zero-current entries are kept");
        assert!(rendered.contains("2.0 KiB"));
    }
}
