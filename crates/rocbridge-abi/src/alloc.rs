//! Reference-counted heap allocations and the allocator callbacks foreign code links against.
//!
//! Every heap-backed value is preceded by one signed machine word, the refcount header:
//!
//! - `0` marks a read-only allocation (static data); it is never written or freed.
//! - `isize::MIN` means exactly one owner.
//! - any other negative value means `value - isize::MIN` owners beyond the first.
//!
//! The count moves toward zero as owners are added. Overflow is not checked: reaching zero
//! would take more live references than the address space can hold, and a count that did
//! reach zero would simply leak as read-only.

use std::cell::Cell;
use std::ffi::{c_int, c_void};
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use serde::{Deserialize, Serialize};

pub const REFCOUNT_READONLY: isize = 0;
pub const REFCOUNT_ONE: isize = isize::MIN;

const WORD: usize = mem::size_of::<usize>();

// What malloc/realloc guarantee without an explicit alignment request.
const MALLOC_ALIGN: usize = 2 * WORD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    pub size: usize,
    pub alignment: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocation of {} bytes (alignment {}) failed",
            self.size, self.alignment
        )
    }
}

impl std::error::Error for AllocError {}

/// Allocator counters for the current thread.
///
/// Values are not `Send`, so every allocation is released on the thread that made it and
/// per-thread counters balance exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocStats {
    pub alloc_calls: u64,
    pub realloc_calls: u64,
    pub dealloc_calls: u64,
    pub bytes_alloc_total: u64,
    pub live_allocs: u64,
    pub peak_live_allocs: u64,
}

impl AllocStats {
    const ZERO: AllocStats = AllocStats {
        alloc_calls: 0,
        realloc_calls: 0,
        dealloc_calls: 0,
        bytes_alloc_total: 0,
        live_allocs: 0,
        peak_live_allocs: 0,
    };
}

thread_local! {
    static STATS: Cell<AllocStats> = const { Cell::new(AllocStats::ZERO) };
}

fn record(update: impl FnOnce(&mut AllocStats)) {
    let _ = STATS.try_with(|cell| {
        let mut stats = cell.get();
        update(&mut stats);
        cell.set(stats);
    });
}

pub fn alloc_stats() -> AllocStats {
    STATS.try_with(Cell::get).unwrap_or_default()
}

pub fn reset_alloc_stats() {
    let _ = STATS.try_with(|cell| cell.set(AllocStats::ZERO));
}

fn effective_align(alignment: usize) -> usize {
    // posix_memalign wants a power of two that is a multiple of the pointer size.
    alignment.max(mem::align_of::<*const u8>()).next_power_of_two()
}

unsafe fn raw_alloc(size: usize, alignment: usize) -> *mut u8 {
    let mut out: *mut c_void = ptr::null_mut();
    if libc::posix_memalign(&mut out, effective_align(alignment), size.max(1)) != 0 {
        return ptr::null_mut();
    }
    record(|s| {
        s.alloc_calls += 1;
        s.bytes_alloc_total += size as u64;
        s.live_allocs += 1;
        s.peak_live_allocs = s.peak_live_allocs.max(s.live_allocs);
    });
    out.cast()
}

unsafe fn raw_dealloc(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    libc::free(ptr.cast());
    record(|s| {
        s.dealloc_calls += 1;
        s.live_allocs = s.live_allocs.saturating_sub(1);
    });
}

unsafe fn raw_realloc(ptr: *mut u8, new_size: usize, old_size: usize, alignment: usize) -> *mut u8 {
    if ptr.is_null() {
        return raw_alloc(new_size, alignment);
    }
    record(|s| s.realloc_calls += 1);

    if effective_align(alignment) <= MALLOC_ALIGN {
        let out = libc::realloc(ptr.cast(), new_size.max(1));
        if !out.is_null() {
            record(|s| s.bytes_alloc_total += new_size as u64);
        }
        return out.cast();
    }

    // realloc would drop the extra alignment; move the contents by hand.
    let out = raw_alloc(new_size, alignment);
    if out.is_null() {
        return out;
    }
    ptr::copy_nonoverlapping(ptr, out, old_size.min(new_size));
    raw_dealloc(ptr);
    out
}

#[no_mangle]
pub unsafe extern "C" fn roc_alloc(size: usize, alignment: u32) -> *mut c_void {
    raw_alloc(size, alignment as usize).cast()
}

#[no_mangle]
pub unsafe extern "C" fn roc_realloc(
    ptr: *mut c_void,
    new_size: usize,
    old_size: usize,
    alignment: u32,
) -> *mut c_void {
    raw_realloc(ptr.cast(), new_size, old_size, alignment as usize).cast()
}

#[no_mangle]
pub unsafe extern "C" fn roc_dealloc(ptr: *mut c_void, _alignment: u32) {
    raw_dealloc(ptr.cast());
}

#[no_mangle]
pub unsafe extern "C" fn roc_memcpy(dest: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    ptr::copy_nonoverlapping(src.cast::<u8>(), dest.cast::<u8>(), n);
    dest
}

#[no_mangle]
pub unsafe extern "C" fn roc_memset(dest: *mut c_void, c: c_int, n: usize) -> *mut c_void {
    ptr::write_bytes(dest.cast::<u8>(), c as u8, n);
    dest
}

/// Bytes reserved in front of the data; never smaller than the data's alignment so the
/// data pointer keeps it.
pub const fn header_size(alignment: usize) -> usize {
    if alignment > WORD {
        alignment
    } else {
        WORD
    }
}

/// Allocates `size` bytes behind a one-owner refcount header and returns the data pointer.
pub fn alloc_refcounted(size: usize, alignment: usize) -> Result<NonNull<u8>, AllocError> {
    let header = header_size(alignment);
    let err = AllocError {
        size: size.saturating_add(header),
        alignment,
    };
    let total = size.checked_add(header).ok_or(err)?;

    // SAFETY: `base` is a fresh allocation of `total >= header >= WORD` bytes aligned to at
    // least `max(alignment, WORD)`, so the header slot and the data pointer are in bounds
    // and aligned.
    unsafe {
        let base = NonNull::new(raw_alloc(total, alignment.max(WORD))).ok_or(err)?;
        let data = base.as_ptr().add(header);
        header_ptr(data).write(REFCOUNT_ONE);
        Ok(NonNull::new_unchecked(data))
    }
}

unsafe fn header_ptr(data: *mut u8) -> *mut isize {
    data.sub(WORD).cast()
}

/// Adds an owner. Read-only allocations are left untouched.
///
/// # Safety
/// `data` must be the data pointer of a live refcounted allocation.
pub unsafe fn incref(data: NonNull<u8>) {
    let header = header_ptr(data.as_ptr());
    let count = header.read();
    if count != REFCOUNT_READONLY {
        header.write(count + 1);
    }
}

/// Drops an owner, releasing the allocation when it was the last one. Returns whether the
/// allocation was released.
///
/// # Safety
/// `data` must be the data pointer of a live refcounted allocation created with
/// `alignment`; when this returns `true` the pointer is dangling.
pub unsafe fn decref(data: NonNull<u8>, alignment: usize) -> bool {
    let header = header_ptr(data.as_ptr());
    let count = header.read();
    if count == REFCOUNT_ONE {
        raw_dealloc(data.as_ptr().sub(header_size(alignment)));
        true
    } else {
        if count != REFCOUNT_READONLY {
            header.write(count - 1);
        }
        false
    }
}

/// Decoded refcount header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refcount {
    ReadOnly,
    Unique,
    /// Total number of owners (always at least two).
    Shared(usize),
}

impl Refcount {
    pub fn decode(raw: isize) -> Option<Refcount> {
        match raw {
            REFCOUNT_READONLY => Some(Refcount::ReadOnly),
            REFCOUNT_ONE => Some(Refcount::Unique),
            n if n < 0 => Some(Refcount::Shared(n.wrapping_sub(REFCOUNT_ONE) as usize + 1)),
            _ => None,
        }
    }
}

/// # Safety
/// `data` must be the data pointer of a live refcounted allocation.
pub unsafe fn refcount(data: NonNull<u8>) -> Option<Refcount> {
    Refcount::decode(header_ptr(data.as_ptr()).read())
}

/// Read-only allocation laid out the way foreign code expects static data: a zero header
/// followed by the bytes. Values built on one never write the header and never free it.
#[repr(C)]
pub struct StaticAllocation<const N: usize> {
    header: isize,
    data: [u8; N],
}

impl<const N: usize> StaticAllocation<N> {
    pub const fn new(data: [u8; N]) -> Self {
        Self {
            header: REFCOUNT_READONLY,
            data,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn header(&self) -> isize {
        self.header
    }

    pub(crate) fn data_ptr(&'static self) -> *mut u8 {
        self.data.as_ptr().cast_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keeps_requested_alignment() {
        assert_eq!(header_size(1), WORD);
        assert_eq!(header_size(WORD), WORD);
        assert_eq!(header_size(32), 32);

        let data = alloc_refcounted(40, 32).unwrap();
        assert_eq!(data.as_ptr() as usize % 32, 0);
        unsafe {
            assert_eq!(refcount(data), Some(Refcount::Unique));
            assert!(decref(data, 32));
        }
    }

    #[test]
    fn single_decref_releases_exactly_once() {
        reset_alloc_stats();
        let data = alloc_refcounted(64, 1).unwrap();
        assert_eq!(alloc_stats().live_allocs, 1);

        assert!(unsafe { decref(data, 1) });
        let stats = alloc_stats();
        assert_eq!(stats.alloc_calls, 1);
        assert_eq!(stats.dealloc_calls, 1);
        assert_eq!(stats.live_allocs, 0);
    }

    #[test]
    fn shared_allocation_survives_first_decref() {
        reset_alloc_stats();
        let data = alloc_refcounted(64, 1).unwrap();
        unsafe {
            incref(data);
            assert_eq!(refcount(data), Some(Refcount::Shared(2)));

            assert!(!decref(data, 1));
            assert_eq!(alloc_stats().dealloc_calls, 0);
            assert_eq!(refcount(data), Some(Refcount::Unique));

            assert!(decref(data, 1));
        }
        assert_eq!(alloc_stats().dealloc_calls, 1);
    }

    #[test]
    fn readonly_header_is_never_written() {
        static STATIC: StaticAllocation<4> = StaticAllocation::new(*b"abcd");
        let data = NonNull::new(STATIC.data_ptr()).unwrap();
        for _ in 0..8 {
            unsafe {
                incref(data);
                assert!(!decref(data, 1));
                assert!(!decref(data, 1));
            }
        }
        assert_eq!(STATIC.header(), REFCOUNT_READONLY);
        assert_eq!(STATIC.bytes(), b"abcd");
    }

    #[test]
    fn refcount_decoding() {
        assert_eq!(Refcount::decode(0), Some(Refcount::ReadOnly));
        assert_eq!(Refcount::decode(isize::MIN), Some(Refcount::Unique));
        assert_eq!(Refcount::decode(isize::MIN + 4), Some(Refcount::Shared(5)));
        assert_eq!(Refcount::decode(7), None);
    }

    #[test]
    fn callbacks_roundtrip_through_realloc() {
        reset_alloc_stats();
        unsafe {
            let p = roc_alloc(8, 1).cast::<u8>();
            assert!(!p.is_null());
            roc_memset(p.cast(), 0x5a, 8);
            let q = roc_realloc(p.cast(), 64, 8, 1).cast::<u8>();
            assert!(!q.is_null());
            assert_eq!(std::slice::from_raw_parts(q, 8), &[0x5a; 8]);

            let wide = roc_realloc(q.cast(), 128, 64, 64).cast::<u8>();
            assert_eq!(wide as usize % 64, 0);
            assert_eq!(std::slice::from_raw_parts(wide, 8), &[0x5a; 8]);
            roc_dealloc(wide.cast(), 64);
        }
        let stats = alloc_stats();
        assert_eq!(stats.realloc_calls, 2);
        assert_eq!(stats.live_allocs, 0);
    }
}
