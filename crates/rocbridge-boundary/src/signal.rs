use std::ffi::{c_int, CStr};

/// Signals that end a worker as a trap.
pub const FATAL_SIGNALS: [c_int; 4] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGFPE, libc::SIGILL];

/// Platform description of a signal (`strsignal`), e.g. `Segmentation fault`.
pub fn describe(signal: c_int) -> String {
    let text = unsafe { libc::strsignal(signal) };
    if text.is_null() {
        return format!("signal {signal}");
    }
    // SAFETY: strsignal returns a NUL-terminated string; it is copied before any other
    // call could overwrite it.
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

/// Restores the default (terminating) disposition of [`FATAL_SIGNALS`] and unblocks them,
/// so a trap ends the calling process even if the host installed handlers. Also disables
/// core dumps for the process.
///
/// # Safety
/// Changes process-wide signal state; only call it in a freshly forked worker.
pub(crate) unsafe fn reset_fatal_signals() {
    let mut mask: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut mask);

    for signal in FATAL_SIGNALS {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal, &action, std::ptr::null_mut());
        libc::sigaddset(&mut mask, signal);
    }
    libc::pthread_sigmask(libc::SIG_UNBLOCK, &mask, std::ptr::null_mut());

    let core = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    libc::setrlimit(libc::RLIMIT_CORE, &core);
}
