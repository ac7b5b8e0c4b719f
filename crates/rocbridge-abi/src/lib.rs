//! Foreign-ABI values shared with compiled Roc code.
//!
//! [`RocStr`] and [`RocBytes`] are three machine words (`data`, `len`, `capacity`) whose
//! heap form sits behind a refcount header managed by [`alloc`]. The [`marshal`] adapters
//! move host text in and out of them.

#![allow(clippy::missing_safety_doc)]

#[cfg(target_endian = "big")]
compile_error!("rocbridge-abi supports little-endian targets only");

pub mod alloc;
pub mod bytes;
pub mod marshal;
pub mod text;

use std::mem;

pub use alloc::{alloc_stats, reset_alloc_stats, AllocError, AllocStats, Refcount, StaticAllocation};
pub use bytes::RocBytes;
pub use marshal::{HostText, MarshalError};
pub use text::{RocStr, StrRepr, SMALL_STR_MAX_LEN, STR_SIZE};

const _: () = assert!(mem::size_of::<RocBytes>() == 3 * mem::size_of::<usize>());
const _: () = assert!(mem::size_of::<RocStr>() == 3 * mem::size_of::<usize>());
const _: () = assert!(mem::align_of::<RocStr>() == mem::align_of::<usize>());

/// A value kind that can be handed to a foreign entry point and carried back as bytes.
pub trait RocValue: Sized {
    const KIND: &'static str;

    fn content(&self) -> &[u8];

    /// Copies the content out, releasing this reference.
    fn into_content(self) -> Vec<u8>;

    /// Rebuilds an owned value holding `content`.
    fn from_content(content: &[u8]) -> Result<Self, AllocError>;
}

impl RocValue for RocStr {
    const KIND: &'static str = "str";

    fn content(&self) -> &[u8] {
        self.as_bytes()
    }

    fn into_content(self) -> Vec<u8> {
        self.into_bytes()
    }

    fn from_content(content: &[u8]) -> Result<Self, AllocError> {
        RocStr::from_bytes(content)
    }
}

impl RocValue for RocBytes {
    const KIND: &'static str = "bytes";

    fn content(&self) -> &[u8] {
        self.as_slice()
    }

    fn into_content(self) -> Vec<u8> {
        self.into_vec()
    }

    fn from_content(content: &[u8]) -> Result<Self, AllocError> {
        RocBytes::from_slice(content)
    }
}
