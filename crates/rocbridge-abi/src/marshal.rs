//! Conversions between host values and [`RocStr`]/[`RocBytes`].
//!
//! The `*_into_*` adapters consume the value (releasing its reference); the `*_as_*`
//! adapters only read it.

use std::ffi::CString;
use std::fmt;

use crate::alloc::AllocError;
use crate::bytes::RocBytes;
use crate::text::{RocStr, STR_SIZE};

/// Host-side text or bytes that can be copied into a foreign value.
pub trait HostText {
    /// Length in bytes, as the host reports it.
    fn byte_len(&self) -> usize;

    /// Copies at most `dst.len()` bytes into `dst` and returns how many were written.
    fn copy_into(&self, dst: &mut [u8]) -> usize;
}

impl HostText for str {
    fn byte_len(&self) -> usize {
        self.len()
    }

    fn copy_into(&self, dst: &mut [u8]) -> usize {
        let mut n = dst.len().min(self.len());
        // Never hand over half a code point.
        while !self.is_char_boundary(n) {
            n -= 1;
        }
        dst[..n].copy_from_slice(&self.as_bytes()[..n]);
        n
    }
}

impl HostText for String {
    fn byte_len(&self) -> usize {
        self.as_str().byte_len()
    }

    fn copy_into(&self, dst: &mut [u8]) -> usize {
        self.as_str().copy_into(dst)
    }
}

impl HostText for [u8] {
    fn byte_len(&self) -> usize {
        self.len()
    }

    fn copy_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self[..n]);
        n
    }
}

impl HostText for Vec<u8> {
    fn byte_len(&self) -> usize {
        self.len()
    }

    fn copy_into(&self, dst: &mut [u8]) -> usize {
        self.as_slice().copy_into(dst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    Alloc(AllocError),
    InvalidUtf8 { valid_up_to: usize },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalError::Alloc(err) => write!(f, "marshaling failed: {err}"),
            MarshalError::InvalidUtf8 { valid_up_to } => {
                write!(f, "string is not valid UTF-8 after byte {valid_up_to}")
            }
        }
    }
}

impl std::error::Error for MarshalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MarshalError::Alloc(err) => Some(err),
            MarshalError::InvalidUtf8 { .. } => None,
        }
    }
}

impl From<AllocError> for MarshalError {
    fn from(err: AllocError) -> Self {
        MarshalError::Alloc(err)
    }
}

/// Builds a string from host text. Content that fits next to a host terminator is stored
/// inline; anything longer is copied straight into a refcounted allocation. The resulting
/// length is the number of bytes the host actually copied.
pub fn str_from_host<H: HostText + ?Sized>(host: &H) -> Result<RocStr, MarshalError> {
    let len = host.byte_len();
    if len.saturating_add(1) < STR_SIZE {
        let mut buf = [0u8; STR_SIZE];
        let copied = host.copy_into(&mut buf[..len]);
        return Ok(RocStr::from_inline_buf(buf, copied));
    }
    let bytes = RocBytes::from_fill(len, |dst| host.copy_into(dst)).map_err(|err| {
        tracing::warn!(len, %err, "allocation failed while marshaling a host string");
        MarshalError::from(err)
    })?;
    Ok(RocStr::from_heap(bytes))
}

/// Builds a byte sequence from host data. Byte sequences have no inline form.
pub fn bytes_from_host<H: HostText + ?Sized>(host: &H) -> Result<RocBytes, MarshalError> {
    let len = host.byte_len();
    RocBytes::from_fill(len, |dst| host.copy_into(dst)).map_err(|err| {
        tracing::warn!(len, %err, "allocation failed while marshaling host bytes");
        MarshalError::from(err)
    })
}

pub fn str_into_host(value: RocStr) -> Result<String, MarshalError> {
    value.into_string().map_err(|err| MarshalError::InvalidUtf8 {
        valid_up_to: err.utf8_error().valid_up_to(),
    })
}

pub fn str_as_host(value: &RocStr) -> Result<String, MarshalError> {
    value
        .to_str()
        .map(str::to_owned)
        .map_err(|err| MarshalError::InvalidUtf8 {
            valid_up_to: err.valid_up_to(),
        })
}

pub fn bytes_into_host(value: RocBytes) -> Vec<u8> {
    value.into_vec()
}

pub fn bytes_as_host(value: &RocBytes) -> Vec<u8> {
    value.as_slice().to_vec()
}

/// Consumes bytes the caller knows to be UTF-8 text.
pub fn bytes_into_host_string(value: RocBytes) -> Result<String, MarshalError> {
    String::from_utf8(value.into_vec()).map_err(|err| MarshalError::InvalidUtf8 {
        valid_up_to: err.utf8_error().valid_up_to(),
    })
}

/// Consumes a string into a fresh null-terminated buffer. Content after an interior NUL
/// is dropped, which is what a C reader of the buffer would see anyway.
pub fn str_into_c_string(value: RocStr) -> CString {
    let mut bytes = value.into_bytes();
    if let Some(nul) = bytes.iter().position(|&b| b == 0) {
        bytes.truncate(nul);
    }
    CString::new(bytes).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{alloc_stats, reset_alloc_stats};
    use crate::text::SMALL_STR_MAX_LEN;

    /// Host that claims more bytes than it hands over.
    struct ShortHost {
        claimed: usize,
        actual: &'static [u8],
    }

    impl HostText for ShortHost {
        fn byte_len(&self) -> usize {
            self.claimed
        }

        fn copy_into(&self, dst: &mut [u8]) -> usize {
            self.actual.copy_into(dst)
        }
    }

    /// Host whose reported length no allocator can satisfy.
    struct Oversized(usize);

    impl HostText for Oversized {
        fn byte_len(&self) -> usize {
            self.0
        }

        fn copy_into(&self, _dst: &mut [u8]) -> usize {
            unreachable!("nothing to copy into a failed allocation")
        }
    }

    #[test]
    fn oversized_host_values_fail_with_alloc_errors() {
        reset_alloc_stats();
        for len in [usize::MAX, usize::MAX / 2, 1 << 60] {
            let host = Oversized(len);
            assert!(
                matches!(str_from_host(&host), Err(MarshalError::Alloc(_))),
                "len={len}"
            );
            assert!(
                matches!(bytes_from_host(&host), Err(MarshalError::Alloc(_))),
                "len={len}"
            );
        }
        assert_eq!(alloc_stats().live_allocs, 0);
    }

    #[test]
    fn inline_length_is_what_the_host_copied() {
        let host = ShortHost {
            claimed: 10,
            actual: b"abc",
        };
        let s = str_from_host(&host).unwrap();
        assert!(s.is_small());
        assert_eq!(s.as_bytes(), b"abc");
        assert_eq!(s, RocStr::new("abc").unwrap());
    }

    #[test]
    fn heap_length_is_what_the_host_copied() {
        let host = ShortHost {
            claimed: 64,
            actual: b"only thirty bytes were copied!",
        };
        let s = str_from_host(&host).unwrap();
        assert!(!s.is_small());
        assert_eq!(s.len(), 30);
        assert_eq!(s.raw_parts().2, 64);
    }

    #[test]
    fn threshold_follows_the_terminator_rule() {
        let inline = "i".repeat(SMALL_STR_MAX_LEN);
        assert!(str_from_host(inline.as_str()).unwrap().is_small());

        let heap = "h".repeat(SMALL_STR_MAX_LEN + 1);
        assert!(!str_from_host(heap.as_str()).unwrap().is_small());
    }

    #[test]
    fn consuming_adapter_releases_the_allocation() {
        reset_alloc_stats();
        let text = "a heap-backed string that will be consumed";
        let value = str_from_host(text).unwrap();
        assert_eq!(alloc_stats().live_allocs, 1);

        assert_eq!(str_as_host(&value).unwrap(), text);
        assert_eq!(alloc_stats().live_allocs, 1);

        assert_eq!(str_into_host(value).unwrap(), text);
        assert_eq!(alloc_stats().live_allocs, 0);
        assert_eq!(alloc_stats().dealloc_calls, 1);
    }

    #[test]
    fn invalid_utf8_result_is_still_consumed() {
        reset_alloc_stats();
        let mut raw = vec![b'z'; 40];
        raw[20] = 0xfe;
        let value = RocStr::from_bytes(&raw).unwrap();
        let err = str_into_host(value).unwrap_err();
        assert_eq!(err, MarshalError::InvalidUtf8 { valid_up_to: 20 });
        assert_eq!(alloc_stats().live_allocs, 0);
    }

    #[test]
    fn bytes_roundtrip_and_empty() {
        let data: Vec<u8> = (0..=255).collect();
        let value = bytes_from_host(&data).unwrap();
        assert_eq!(bytes_as_host(&value), data);
        assert_eq!(bytes_into_host(value), data);

        let empty = bytes_from_host(&b""[..]).unwrap();
        assert!(empty.allocation().is_none());
        assert_eq!(bytes_into_host_string(empty).unwrap(), "");
    }

    #[test]
    fn str_copy_stops_at_a_code_point_boundary() {
        let mut dst = [0u8; 2];
        assert_eq!("é!".copy_into(&mut dst), 2);
        assert_eq!("aé".copy_into(&mut dst), 1);
        assert_eq!(dst[0], b'a');
    }

    #[test]
    fn c_string_stops_at_interior_nul() {
        let value = RocStr::new("before\0after").unwrap();
        assert_eq!(str_into_c_string(value).as_bytes(), b"before");
        let value = RocStr::new("a message long enough to need the heap").unwrap();
        assert_eq!(
            str_into_c_string(value).to_str().unwrap(),
            "a message long enough to need the heap"
        );
    }
}
