//! Fingerprints name an allocation call site as `<basename>:<line>`.
//!
//! Path components up to and including the last `/src/` are stripped, so the
//! same logical file reached through different include roots collapses into
//! one bucket:
//!
//! * `/src/heap_file.c` → `heap_file.c`
//! * `/home/build/thirdparty/src/heap_file.c` → `heap_file.c`
//! * `base/heap_file.c` → `base/heap_file.c` (no marker, kept whole)

use std::cell::RefCell;
use std::fmt::Write as _;

const SOURCE_ROOT_MARKER: &str = "/src/";

/// Strip everything up to and including the last `/src/`.
///
/// A path without the marker, or one where stripping would leave nothing, is
/// returned unchanged.
fn strip_source_root(path: &str) -> &str {
    match path.rfind(SOURCE_ROOT_MARKER) {
        Some(i) => {
            let stripped = &path[i + SOURCE_ROOT_MARKER.len()..];
            if stripped.is_empty() { path } else { stripped }
        }
        None => path,
    }
}

thread_local! {
    static SCRATCH: RefCell<String> = RefCell::new(String::with_capacity(96));
}

/// Compose the fingerprint for a call site and hand it to `with`.
///
/// The key is built in a thread-local scratch buffer so the hot allocation
/// path composes it without heap traffic of its own.
pub(crate) fn with_fingerprint<R>(file: &str, line: u32, with: impl FnOnce(&str) -> R) -> R {
    SCRATCH.with_borrow_mut(|scratch| {
        scratch.clear();
        scratch.push_str(strip_source_root(file));
        scratch.push(':');
        write!(scratch, "{line}").ok();
        with(scratch)
    })
}
