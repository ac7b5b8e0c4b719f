//! The `roc_panic` callback.
//!
//! Inside a worker the message is sent to the supervisor as a `Panic` frame and the worker
//! exits with `WORKER_EXIT_PANIC`. Outside a worker there is nobody to recover, so the
//! message goes to stderr and the process aborts.

use std::cell::Cell;
use std::ffi::c_int;
use std::ptr;

use rocbridge_abi::marshal::str_into_c_string;
use rocbridge_abi::RocStr;
use rocbridge_contracts::{WORKER_EXIT_IO, WORKER_EXIT_PANIC};

use crate::frame::{self, Frame};

thread_local! {
    static REPORT_FD: Cell<Option<c_int>> = const { Cell::new(None) };
}

/// Routes panics on this thread to `fd`. Called once in a freshly forked worker.
pub(crate) fn arm(fd: c_int) {
    REPORT_FD.with(|cell| cell.set(Some(fd)));
}

/// Panic callback for foreign code. Takes ownership of `*msg`.
///
/// # Safety
/// `msg` must be null or point at a valid `RocStr` the caller gives up.
#[no_mangle]
pub unsafe extern "C" fn roc_panic(msg: *const RocStr) -> ! {
    let message = if msg.is_null() {
        Vec::new()
    } else {
        str_into_c_string(ptr::read(msg)).into_bytes()
    };
    report_panic(&message)
}

/// Sends `message` as this worker's panic report and exits.
pub fn report_panic(message: &[u8]) -> ! {
    let fd = REPORT_FD.try_with(Cell::get).ok().flatten();
    let Some(fd) = fd else {
        eprintln!(
            "roc_panic outside a call boundary: {}",
            String::from_utf8_lossy(message)
        );
        std::process::abort();
    };

    let code = match frame::write_all_fd(fd, &frame::encode(Frame::Panic(message))) {
        Ok(()) => WORKER_EXIT_PANIC,
        Err(_) => WORKER_EXIT_IO,
    };
    unsafe { libc::_exit(code) }
}
