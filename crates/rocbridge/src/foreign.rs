//! Loading the compiled foreign library.

use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use rocbridge_abi::RocValue;
use rocbridge_boundary::EntryFn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub op: &'static str,
    pub target: String,
    pub detail: String,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.op, self.target, self.detail)
    }
}

impl std::error::Error for LoadError {}

/// A `dlopen`ed shared library, closed on drop.
pub struct ForeignLibrary {
    handle: NonNull<c_void>,
    path: PathBuf,
}

impl ForeignLibrary {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let err = |detail: String| LoadError {
            op: "open foreign library",
            target: path.display().to_string(),
            detail,
        };
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| err("path contains a NUL byte".to_string()))?;

        // Symbols referenced by the library resolve against the executable.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        let handle = NonNull::new(handle).ok_or_else(|| err(last_dl_error()))?;
        tracing::debug!(path = %path.display(), "opened foreign library");
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn symbol(&self, name: &str) -> Result<NonNull<c_void>, LoadError> {
        let err = |detail: String| LoadError {
            op: "resolve symbol",
            target: format!("{name} in {}", self.path.display()),
            detail,
        };
        let c_name = CString::new(name).map_err(|_| err("name contains a NUL byte".to_string()))?;
        unsafe { libc::dlerror() };
        let sym = unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
        NonNull::new(sym).ok_or_else(|| err(last_dl_error()))
    }

    /// Resolves `name` as a single-argument entry point taking and returning `V`.
    ///
    /// # Safety
    /// The symbol must really have the [`EntryFn<V>`] signature.
    pub unsafe fn entry<V: RocValue>(&self, name: &str) -> Result<EntryFn<V>, LoadError> {
        let sym = self.symbol(name)?;
        Ok(std::mem::transmute_copy::<*mut c_void, EntryFn<V>>(&sym.as_ptr()))
    }
}

impl Drop for ForeignLibrary {
    fn drop(&mut self) {
        unsafe { libc::dlclose(self.handle.as_ptr()) };
    }
}

fn last_dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        return "unknown dynamic loader error".to_string();
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Keeps the exported `roc_*` callbacks in the final executable so a loaded library can
/// link against them.
pub fn retain_host_symbols() {
    let symbols: [*const c_void; 6] = [
        rocbridge_abi::alloc::roc_alloc as *const c_void,
        rocbridge_abi::alloc::roc_realloc as *const c_void,
        rocbridge_abi::alloc::roc_dealloc as *const c_void,
        rocbridge_abi::alloc::roc_memcpy as *const c_void,
        rocbridge_abi::alloc::roc_memset as *const c_void,
        rocbridge_boundary::roc_panic as *const c_void,
    ];
    std::hint::black_box(symbols);
}
