use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Bound, Deref, RangeBounds};
use std::ptr::{self, NonNull};

use crate::alloc::{self, AllocError, Refcount, StaticAllocation};

/// Sign bit of a machine word. Marks a seamless slice in `len`, a small string in
/// `capacity`, and doubles as the capacity of an empty value.
pub const SIGN_BIT: usize = isize::MIN as usize;

/// Elements are bytes.
pub(crate) const ELEM_ALIGN: usize = 1;

/// Immutable, reference-counted byte sequence with the foreign `List U8` layout.
///
/// A seamless slice stores its parent allocation's data pointer, shifted right by one, in
/// `capacity` and sets the sign bit of `len`; `data` points at the first byte of the view.
#[repr(C)]
pub struct RocBytes {
    data: *mut u8,
    len: usize,
    capacity: usize,
    // Non-atomic refcount: not Send, not Sync.
    _not_send: PhantomData<*mut u8>,
}

impl RocBytes {
    pub const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
            capacity: SIGN_BIT,
            _not_send: PhantomData,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AllocError> {
        Self::from_slice_with_capacity(bytes, bytes.len())
    }

    /// Copies `bytes` into a fresh allocation of at least `capacity` bytes.
    pub fn from_slice_with_capacity(bytes: &[u8], capacity: usize) -> Result<Self, AllocError> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        Self::from_fill(capacity.max(bytes.len()), |dst| {
            dst[..bytes.len()].copy_from_slice(bytes);
            bytes.len()
        })
    }

    /// Allocates `capacity` bytes and lets `fill` write into them; `fill` returns how many
    /// bytes it actually wrote, which becomes the length. Nothing is allocated when either
    /// number is zero.
    pub fn from_fill(
        capacity: usize,
        fill: impl FnOnce(&mut [u8]) -> usize,
    ) -> Result<Self, AllocError> {
        if capacity == 0 {
            return Ok(Self::empty());
        }
        let data = alloc::alloc_refcounted(capacity, ELEM_ALIGN)?;
        // SAFETY: `data` is a fresh allocation of `capacity` bytes. Zeroing first means
        // `fill` never sees uninitialized memory.
        let written = unsafe {
            ptr::write_bytes(data.as_ptr(), 0, capacity);
            let dst = std::slice::from_raw_parts_mut(data.as_ptr(), capacity);
            fill(dst).min(capacity)
        };
        if written == 0 {
            unsafe { alloc::decref(data, ELEM_ALIGN) };
            return Ok(Self::empty());
        }
        Ok(Self {
            data: data.as_ptr(),
            len: written,
            capacity,
            _not_send: PhantomData,
        })
    }

    /// Wraps a read-only allocation. Cloning and dropping the result never touch it.
    pub fn from_static<const N: usize>(allocation: &'static StaticAllocation<N>) -> Self {
        if N == 0 {
            return Self::empty();
        }
        Self {
            data: allocation.data_ptr(),
            len: N,
            capacity: N,
            _not_send: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len & !SIGN_BIT
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_seamless_slice(&self) -> bool {
        (self.len as isize) < 0
    }

    /// Usable capacity; a seamless slice reports its length.
    pub fn capacity(&self) -> usize {
        if self.is_seamless_slice() || self.data.is_null() {
            self.len()
        } else {
            self.capacity
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_null() {
            return &[];
        }
        // SAFETY: a non-null `data` points at `len()` initialized bytes kept alive by the
        // reference this value owns.
        unsafe { std::slice::from_raw_parts(self.data, self.len()) }
    }

    /// Raw `(data, len, capacity)` words exactly as foreign code sees them.
    pub fn raw_parts(&self) -> (*const u8, usize, usize) {
        (self.data, self.len, self.capacity)
    }

    /// Data pointer of the refcounted allocation backing this value, if any.
    pub fn allocation(&self) -> Option<NonNull<u8>> {
        if self.is_seamless_slice() {
            NonNull::new((self.capacity << 1) as *mut u8)
        } else {
            NonNull::new(self.data)
        }
    }

    pub fn refcount(&self) -> Option<Refcount> {
        // SAFETY: the allocation is live while `self` owns a reference to it.
        self.allocation().and_then(|p| unsafe { alloc::refcount(p) })
    }

    /// Allocation-free view of `range` sharing this value's allocation.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Option<Self> {
        let (start, end) = resolve_range(range, self.len())?;
        if start == end {
            return Some(Self::empty());
        }
        let allocation = self.allocation()?;
        // SAFETY: the allocation is live; the new view holds its own reference.
        unsafe { alloc::incref(allocation) };
        Some(Self {
            // SAFETY: `start < end <= len()`, so the offset stays inside the view.
            data: unsafe { self.data.add(start) },
            len: (end - start) | SIGN_BIT,
            capacity: (allocation.as_ptr() as usize) >> 1,
            _not_send: PhantomData,
        })
    }

    /// Copies the bytes out and releases this reference.
    pub fn into_vec(self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

pub(crate) fn resolve_range(range: impl RangeBounds<usize>, len: usize) -> Option<(usize, usize)> {
    let start = match range.start_bound() {
        Bound::Included(&n) => n,
        Bound::Excluded(&n) => n.checked_add(1)?,
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&n) => n.checked_add(1)?,
        Bound::Excluded(&n) => n,
        Bound::Unbounded => len,
    };
    (start <= end && end <= len).then_some((start, end))
}

impl Drop for RocBytes {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation() {
            // SAFETY: this value owns one reference to the allocation.
            unsafe { alloc::decref(allocation, ELEM_ALIGN) };
        }
    }
}

impl Clone for RocBytes {
    fn clone(&self) -> Self {
        if let Some(allocation) = self.allocation() {
            // SAFETY: the allocation is live while `self` owns a reference to it.
            unsafe { alloc::incref(allocation) };
        }
        Self {
            data: self.data,
            len: self.len,
            capacity: self.capacity,
            _not_send: PhantomData,
        }
    }
}

impl Default for RocBytes {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for RocBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for RocBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for RocBytes {}

impl Hash for RocBytes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl fmt::Debug for RocBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocBytes")
            .field("bytes", &self.as_slice())
            .field("seamless", &self.is_seamless_slice())
            .finish()
    }
}
