//! Tracked wrappers around the platform allocation primitives.
//!
//! While the monitor is enabled, every allocation made through these entry
//! points carries an [`AllocHeader`] in front of its payload and is
//! attributed to the bucket of its call site. While it is disabled they
//! forward straight to libc, byte for byte.
//!
//! The [`track_alloc!`] family of macros captures `file!()`/`line!()` so
//! call sites don't have to spell their own location out.

#![allow(unsafe_code)]

use std::ffi::c_char;
use std::ptr::{self, null_mut};

use crate::header::{AllocHeader, METAINFO_SIZE};
use crate::monitor::global;

/// Usable size of the block behind `ptr`, as the platform allocator reports
/// it. Zero when the platform has nothing to say.
///
/// # Safety
/// `ptr` must point at a live block obtained from the platform allocator.
unsafe fn platform_usable_size(ptr: *mut u8) -> usize {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    // SAFETY: per this function's contract.
    return unsafe { libc::malloc_usable_size(ptr.cast()) };

    #[cfg(target_os = "macos")]
    // SAFETY: per this function's contract.
    return unsafe { libc::malloc_size(ptr.cast()) };

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    {
        let _ = ptr;
        0
    }
}

/// The size stamped into the header and added to the counters: the usable
/// size of the whole base block, or the requested total where the platform
/// won't tell us.
unsafe fn recorded_size_of(base: *mut u8, requested_total: usize) -> u64 {
    // SAFETY: forwarded contract.
    match unsafe { platform_usable_size(base) } {
        0 => requested_total as u64,
        usable => usable as u64,
    }
}

/// Allocate `size` usable bytes, attributed to `file:line`.
///
/// Returns null if the platform allocator fails or `size` is within a
/// header of `usize::MAX`; counters are untouched in both cases. With the
/// monitor disabled this is plain `malloc(size)`.
///
/// # Safety
/// The returned block must be released with [`tracked_free`] (or
/// [`tracked_realloc`]), not with the bare platform `free`.
pub unsafe fn tracked_alloc(size: usize, file: &str, line: u32) -> *mut u8 {
    let Some(monitor) = global() else {
        // SAFETY: plain malloc.
        return unsafe { libc::malloc(size) }.cast();
    };

    let Some(total) = size.checked_add(METAINFO_SIZE) else {
        return null_mut();
    };

    // SAFETY: plain malloc.
    let base: *mut u8 = unsafe { libc::malloc(total) }.cast();
    if base.is_null() {
        return null_mut();
    }

    // SAFETY: `base` is a live block of at least `total` bytes.
    let recorded = unsafe { recorded_size_of(base, total) };
    // SAFETY: `base` is live, owned, and large enough for the header.
    unsafe { monitor.add_stat(base, recorded, file, line) }
}

/// Allocate a zero-initialized array of `num` × `size` bytes, attributed to
/// `file:line`. Null on overflow or allocator failure.
///
/// # Safety
/// Same release contract as [`tracked_alloc`].
pub unsafe fn tracked_calloc(num: usize, size: usize, file: &str, line: u32) -> *mut u8 {
    if global().is_none() {
        // SAFETY: plain calloc.
        return unsafe { libc::calloc(num, size) }.cast();
    }

    let Some(payload_size) = num.checked_mul(size) else {
        return null_mut();
    };

    // SAFETY: forwarded contract.
    let payload = unsafe { tracked_alloc(payload_size, file, line) };
    if !payload.is_null() {
        // SAFETY: the block has `payload_size` writable bytes past `payload`.
        unsafe { ptr::write_bytes(payload, 0, payload_size) };
    }
    payload
}

/// Resize `ptr` to `new_size` usable bytes, attributed to `file:line`.
///
/// Platform realloc semantics: a null `ptr` allocates, a zero `new_size`
/// frees and returns null. Otherwise the old contribution is subtracted and
/// the new one added, so the block is accounted exactly once; on allocation
/// failure the old block is left untouched and null is returned.
///
/// # Safety
/// `ptr` must be null or a live pointer from the tracked entry points or
/// the bare platform allocator, and must not be used after a successful
/// call.
pub unsafe fn tracked_realloc(ptr: *mut u8, new_size: usize, file: &str, line: u32) -> *mut u8 {
    if global().is_none() {
        // SAFETY: plain realloc.
        return unsafe { libc::realloc(ptr.cast(), new_size) }.cast();
    }

    if ptr.is_null() {
        // SAFETY: forwarded contract.
        return unsafe { tracked_alloc(new_size, file, line) };
    }
    if new_size == 0 {
        // SAFETY: forwarded contract.
        unsafe { tracked_free(ptr) };
        return null_mut();
    }

    // What the old block can legitimately hand over: its payload capacity
    // for tracked blocks, the platform usable size for bare ones.
    // SAFETY: `ptr` is live per this function's contract.
    let old_capacity = match unsafe { AllocHeader::peek(ptr) } {
        Some(header) => (header.recorded_size() as usize).saturating_sub(METAINFO_SIZE),
        // SAFETY: `ptr` is a live bare block.
        None => match unsafe { platform_usable_size(ptr) } {
            // The platform won't say how big the bare block is, so a copy
            // could not be sized safely; resize it bare instead.
            // SAFETY: plain realloc of a bare block.
            0 => return unsafe { libc::realloc(ptr.cast(), new_size) }.cast(),
            usable => usable,
        },
    };

    // Allocate-new, copy, free-old; growing in place would bypass the
    // header bookkeeping.
    // SAFETY: forwarded contract.
    let new_payload = unsafe { tracked_alloc(new_size, file, line) };
    if new_payload.is_null() {
        return null_mut();
    }

    let copy_size = old_capacity.min(new_size);
    // SAFETY: both regions are live and at least `copy_size` bytes long.
    unsafe { ptr::copy_nonoverlapping(ptr, new_payload, copy_size) };
    // SAFETY: forwarded contract.
    unsafe { tracked_free(ptr) };

    new_payload
}

/// Release a block obtained from the tracked entry points or from the bare
/// platform allocator. Accepts null.
///
/// Tracked blocks (header magic matches) get their counters unwound and
/// their magic scrubbed before the platform free, so a double free no
/// longer matches as tracked. Bare blocks are freed as-is with no counter
/// movement.
///
/// # Safety
/// `ptr` must be null, or a live pointer as described above; the block must
/// not be touched after this call.
pub unsafe fn tracked_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    let base = match global() {
        // SAFETY: forwarded contract.
        Some(monitor) => unsafe { monitor.sub_stat(ptr) },
        // Monitor gone (or never there): still honor headers stamped while
        // it was up, or freeing their payload pointer would corrupt the
        // heap.
        // SAFETY: forwarded contract.
        None => match unsafe { AllocHeader::peek(ptr) } {
            Some(_) => unsafe { AllocHeader::consume(ptr) },
            None => ptr,
        },
    };

    // SAFETY: `base` is the platform pointer of the live block.
    unsafe { libc::free(base.cast()) };
}

/// Copy the nul-terminated string `s` into a fresh tracked allocation.
/// Null if the allocation fails.
///
/// # Safety
/// `s` must be a valid nul-terminated string. Same release contract as
/// [`tracked_alloc`].
pub unsafe fn tracked_strdup(s: *const c_char, file: &str, line: u32) -> *mut c_char {
    // SAFETY: `s` is valid and nul-terminated per this function's contract.
    let len_with_nul = unsafe { libc::strlen(s) } + 1;

    // SAFETY: forwarded contract.
    let copy = unsafe { tracked_alloc(len_with_nul, file, line) };
    if !copy.is_null() {
        // SAFETY: source and destination are both at least `len_with_nul`
        // bytes and distinct.
        unsafe { ptr::copy_nonoverlapping(s.cast::<u8>(), copy, len_with_nul) };
    }
    copy.cast()
}

/// The recorded size for tracked blocks, zero for null, the platform
/// usable size for bare blocks.
///
/// # Safety
/// `ptr` must be null or a live pointer as accepted by [`tracked_free`].
pub unsafe fn get_allocated_size(ptr: *const u8) -> u64 {
    if ptr.is_null() {
        return 0;
    }
    // SAFETY: per this function's contract.
    match unsafe { AllocHeader::peek(ptr) } {
        Some(header) => header.recorded_size(),
        // SAFETY: `ptr` is a live bare block.
        None => unsafe { platform_usable_size(ptr.cast_mut()) as u64 },
    }
}

// ----------------------------------------------------------------------------

/// [`tracked_alloc`] with the location of the calling source line.
#[macro_export]
macro_rules! track_alloc {
    ($size:expr) => {
        $crate::tracked_alloc($size, file!(), line!())
    };
}

/// [`tracked_calloc`] with the location of the calling source line.
#[macro_export]
macro_rules! track_calloc {
    ($num:expr, $size:expr) => {
        $crate::tracked_calloc($num, $size, file!(), line!())
    };
}

/// [`tracked_realloc`] with the location of the calling source line.
#[macro_export]
macro_rules! track_realloc {
    ($ptr:expr, $new_size:expr) => {
        $crate::tracked_realloc($ptr, $new_size, file!(), line!())
    };
}

/// [`tracked_strdup`] with the location of the calling source line.
#[macro_export]
macro_rules! track_strdup {
    ($s:expr) => {
        $crate::tracked_strdup($s, file!(), line!())
    };
}

// ----------------------------------------------------------------------------
