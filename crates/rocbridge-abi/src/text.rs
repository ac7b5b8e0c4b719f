use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::{self, ManuallyDrop};
use std::ops::RangeBounds;
use std::str::Utf8Error;
use std::string::FromUtf8Error;

use crate::alloc::{AllocError, Refcount, StaticAllocation};
use crate::bytes::{resolve_range, RocBytes};

pub const STR_SIZE: usize = mem::size_of::<RocBytes>();

/// Longest content stored inline when marshaling host text. The inline form itself can
/// hold `STR_SIZE - 1` bytes; one more byte is kept free because hosts write a terminator.
pub const SMALL_STR_MAX_LEN: usize = STR_SIZE - 2;

const SMALL_TAG: u8 = 0x80;

#[repr(C)]
union StrInner {
    heap: ManuallyDrop<RocBytes>,
    small: [u8; STR_SIZE],
}

/// Immutable UTF-8 string with the foreign `Str` layout.
///
/// The sign bit of `capacity` selects the form. Small strings keep their bytes inline and
/// store `0x80 | len` in the final byte (which is the high byte of `capacity` on the
/// little-endian targets this crate supports). Large strings are a [`RocBytes`].
/// The content is not validated on construction from raw bytes; [`RocStr::to_str`] and
/// [`RocStr::into_string`] do.
#[repr(C)]
pub struct RocStr(StrInner);

/// Typed view of a [`RocStr`]'s two forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrRepr<'a> {
    Small(&'a [u8]),
    Large { bytes: &'a [u8], seamless: bool },
}

impl RocStr {
    pub const fn empty() -> Self {
        // The empty byte sequence (null, 0, sign bit) is also the small string of length 0.
        Self(StrInner {
            heap: ManuallyDrop::new(RocBytes::empty()),
        })
    }

    /// Copies `s`, inline when it is short enough.
    pub fn new(s: &str) -> Result<Self, AllocError> {
        Self::from_bytes(s.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AllocError> {
        if bytes.len() <= SMALL_STR_MAX_LEN {
            Ok(Self::inline(bytes))
        } else {
            Self::large(bytes, bytes.len())
        }
    }

    /// Inline string; `None` when `bytes` is too long for the small form.
    pub fn small(bytes: &[u8]) -> Option<Self> {
        (bytes.len() <= SMALL_STR_MAX_LEN).then(|| Self::inline(bytes))
    }

    /// Heap string with room for at least `capacity` bytes.
    pub fn large(bytes: &[u8], capacity: usize) -> Result<Self, AllocError> {
        Ok(Self::from_heap(RocBytes::from_slice_with_capacity(
            bytes, capacity,
        )?))
    }

    pub fn from_static<const N: usize>(allocation: &'static StaticAllocation<N>) -> Self {
        Self::from_heap(RocBytes::from_static(allocation))
    }

    pub(crate) fn from_heap(bytes: RocBytes) -> Self {
        Self(StrInner {
            heap: ManuallyDrop::new(bytes),
        })
    }

    fn inline(bytes: &[u8]) -> Self {
        let mut buf = [0u8; STR_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self::from_inline_buf(buf, bytes.len())
    }

    /// `buf` must be zero past `len` so equal strings are byte-identical.
    pub(crate) fn from_inline_buf(mut buf: [u8; STR_SIZE], len: usize) -> Self {
        debug_assert!(len < STR_SIZE);
        buf[STR_SIZE - 1] = SMALL_TAG | len as u8;
        Self(StrInner { small: buf })
    }

    fn raw(&self) -> &[u8; STR_SIZE] {
        // SAFETY: every bit pattern of the three words is a valid byte array.
        unsafe { &self.0.small }
    }

    fn heap(&self) -> &RocBytes {
        // SAFETY: every bit pattern is a valid `RocBytes`; callers only dereference its
        // data when the string is large.
        unsafe { &self.0.heap }
    }

    pub fn is_small(&self) -> bool {
        (self.heap().raw_parts().2 as isize) < 0
    }

    pub fn len(&self) -> usize {
        // Both candidates are computed so the selection compiles to a conditional move.
        let small_len = (self.raw()[STR_SIZE - 1] ^ SMALL_TAG) as usize;
        let large_len = self.heap().len();
        if self.is_small() {
            small_len
        } else {
            large_len
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn repr(&self) -> StrRepr<'_> {
        if self.is_small() {
            StrRepr::Small(&self.raw()[..self.len()])
        } else {
            let heap = self.heap();
            StrRepr::Large {
                bytes: heap.as_slice(),
                seamless: heap.is_seamless_slice(),
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self.repr() {
            StrRepr::Small(bytes) => bytes,
            StrRepr::Large { bytes, .. } => bytes,
        }
    }

    pub fn to_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    pub fn is_seamless_slice(&self) -> bool {
        !self.is_small() && self.heap().is_seamless_slice()
    }

    /// Raw `(data, len, capacity)` words. For small strings these are content bytes.
    pub fn raw_parts(&self) -> (*const u8, usize, usize) {
        self.heap().raw_parts()
    }

    pub fn refcount(&self) -> Option<Refcount> {
        if self.is_small() {
            None
        } else {
            self.heap().refcount()
        }
    }

    /// Substring on byte offsets that must fall on UTF-8 boundaries. Short results are
    /// copied inline; longer ones are seamless slices of this string's allocation.
    pub fn substr(&self, range: impl RangeBounds<usize>) -> Option<Self> {
        let bytes = self.as_bytes();
        let (start, end) = resolve_range(range, bytes.len())?;
        if !is_char_boundary(bytes, start) || !is_char_boundary(bytes, end) {
            return None;
        }
        let sub = &bytes[start..end];
        if sub.len() <= SMALL_STR_MAX_LEN || self.is_small() {
            return Some(Self::inline(sub));
        }
        self.heap().slice(start..end).map(Self::from_heap)
    }

    /// Copies the content out and releases this reference.
    pub fn into_bytes(self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Like [`RocStr::into_bytes`], validating UTF-8. The reference is released either way.
    pub fn into_string(self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.into_bytes())
    }
}

fn is_char_boundary(bytes: &[u8], index: usize) -> bool {
    // Continuation bytes are 0b10xx_xxxx.
    index == 0 || index == bytes.len() || bytes.get(index).is_some_and(|&b| (b as i8) >= -0x40)
}

impl Drop for RocStr {
    fn drop(&mut self) {
        if !self.is_small() {
            // SAFETY: large strings own the `RocBytes` in the union.
            unsafe { ManuallyDrop::drop(&mut self.0.heap) };
        }
    }
}

impl Clone for RocStr {
    fn clone(&self) -> Self {
        if self.is_small() {
            Self(StrInner { small: *self.raw() })
        } else {
            Self::from_heap(self.heap().clone())
        }
    }
}

impl Default for RocStr {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for RocStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for RocStr {}

impl Hash for RocStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for RocStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = if self.is_small() { "small" } else { "large" };
        write!(f, "RocStr({form}, {:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Display for RocStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{alloc_stats, reset_alloc_stats};
    use crate::bytes::SIGN_BIT;

    #[test]
    fn threshold_between_inline_and_heap() {
        let at = "x".repeat(SMALL_STR_MAX_LEN);
        let s = RocStr::new(&at).unwrap();
        assert!(s.is_small());
        assert_eq!(s.len(), SMALL_STR_MAX_LEN);
        assert!(matches!(s.repr(), StrRepr::Small(_)));

        let over = "x".repeat(SMALL_STR_MAX_LEN + 1);
        let s = RocStr::new(&over).unwrap();
        assert!(!s.is_small());
        assert_eq!(s.len(), SMALL_STR_MAX_LEN + 1);
        assert_eq!(s.refcount(), Some(Refcount::Unique));
    }

    #[test]
    fn small_strings_with_equal_content_are_byte_identical() {
        let a = RocStr::new("same").unwrap();
        let b = RocStr::small(b"same").unwrap();
        assert_eq!(a.raw(), b.raw());
        assert_eq!(a.raw()[4..STR_SIZE - 1], [0u8; STR_SIZE - 5]);
        assert_eq!(a.raw()[STR_SIZE - 1], 0x80 | 4);
    }

    #[test]
    fn empty_string_is_the_null_sentinel() {
        let s = RocStr::new("").unwrap();
        assert_eq!(s.raw_parts(), (std::ptr::null(), 0, SIGN_BIT));
        assert!(s.is_small());
        assert_eq!(s.len(), 0);
        assert_eq!(s, RocStr::empty());
        assert_eq!(s.into_string().unwrap(), "");
    }

    #[test]
    fn large_string_respects_requested_capacity() {
        let text = "a string that is clearly too long to be inline";
        let s = RocStr::large(text.as_bytes(), 64).unwrap();
        assert_eq!(s.raw_parts().2, 64);
        assert_eq!(s.to_str().unwrap(), text);
        assert!(RocStr::small(text.as_bytes()).is_none());
    }

    #[test]
    fn substr_of_large_string_is_seamless() {
        reset_alloc_stats();
        let s = RocStr::new("the quick brown fox jumps over the lazy dog").unwrap();
        let tail = s.substr(4..).unwrap();
        assert!(tail.is_seamless_slice());
        assert_eq!(tail.to_str().unwrap(), "quick brown fox jumps over the lazy dog");
        assert_eq!(tail.len(), 39);
        assert_eq!(s.refcount(), Some(Refcount::Shared(2)));

        let word = s.substr(4..9).unwrap();
        assert!(word.is_small());
        assert_eq!(word.to_str().unwrap(), "quick");

        drop(s);
        drop(word);
        assert_eq!(alloc_stats().live_allocs, 1);
        assert_eq!(tail.into_string().unwrap().len(), 39);
        assert_eq!(alloc_stats().live_allocs, 0);
        assert_eq!(alloc_stats().alloc_calls, 1);
    }

    #[test]
    fn substr_rejects_split_code_points() {
        let s = RocStr::new("héllo").unwrap();
        assert!(s.substr(0..2).is_none());
        assert_eq!(s.substr(0..3).unwrap().to_str().unwrap(), "hé");
        assert!(s.substr(0..10).is_none());
    }

    #[test]
    fn clone_and_drop_balance_the_refcount() {
        reset_alloc_stats();
        let s = RocStr::new("shared heap string for clone accounting").unwrap();
        let t = s.clone();
        assert_eq!(s.refcount(), Some(Refcount::Shared(2)));
        drop(s);
        assert_eq!(alloc_stats().dealloc_calls, 0);
        drop(t);
        assert_eq!(alloc_stats().dealloc_calls, 1);
    }

    #[test]
    fn invalid_utf8_is_reported_on_conversion() {
        let s = RocStr::from_bytes(&[0x66, 0x6f, 0xff]).unwrap();
        assert!(s.to_str().is_err());
        assert_eq!(s.to_string(), "fo\u{fffd}");
        assert!(s.into_string().is_err());
    }

    #[test]
    fn static_string_stays_readonly() {
        static GREETING: StaticAllocation<26> = StaticAllocation::new(*b"static greeting, read-only");
        let s = RocStr::from_static(&GREETING);
        assert!(!s.is_small());
        assert_eq!(s.refcount(), Some(Refcount::ReadOnly));
        let copies: Vec<RocStr> = (0..4).map(|_| s.clone()).collect();
        drop(copies);
        assert_eq!(GREETING.header(), 0);
        assert_eq!(s.to_str().unwrap(), "static greeting, read-only");
    }
}
