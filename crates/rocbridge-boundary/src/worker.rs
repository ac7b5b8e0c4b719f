//! One foreign invocation in a forked worker process.
//!
//! The worker reports over a pipe with a single frame and then `_exit`s. The supervisor
//! reads the pipe to EOF, reaps the worker, and classifies what happened from the frame
//! and the wait status.

use std::ffi::c_int;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::FromRawFd;
use std::panic::{self, AssertUnwindSafe};

use rocbridge_contracts::{WORKER_EXIT_IO, WORKER_EXIT_OK, WORKER_EXIT_PANIC};

use crate::frame::{self, Frame, FrameError, HEADER_LEN};
use crate::{panic as panic_report, signal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed(Vec<u8>),
    Panicked(String),
    Signaled(c_int),
}

#[derive(Debug)]
pub enum WorkerError {
    Io { op: &'static str, source: io::Error },
    /// The worker exited with a status that does not match its report.
    Exited { status: c_int },
    /// The worker exited without reporting anything.
    MissingFrame { status: c_int },
    Frame(FrameError),
    ResultTooLarge { max: usize },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Io { op, source } => write!(f, "{op}: {source}"),
            WorkerError::Exited { status } => {
                write!(f, "worker exited with unexpected status {status}")
            }
            WorkerError::MissingFrame { status } => {
                write!(f, "worker exited with status {status} without a report")
            }
            WorkerError::Frame(err) => write!(f, "malformed worker report: {err}"),
            WorkerError::ResultTooLarge { max } => {
                write!(f, "result exceeds the {max} byte limit")
            }
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Io { source, .. } => Some(source),
            WorkerError::Frame(err) => Some(err),
            _ => None,
        }
    }
}

fn os_error(op: &'static str) -> WorkerError {
    WorkerError::Io {
        op,
        source: io::Error::last_os_error(),
    }
}

/// Runs `job` in a forked worker and returns what became of it. `job`'s result is the
/// `Ok` payload; it may end the worker early through [`panic_report::report_panic`] or a
/// fatal signal.
pub fn run_isolated<F>(max_result_bytes: usize, job: F) -> Result<WorkerOutcome, WorkerError>
where
    F: FnOnce() -> Vec<u8>,
{
    let mut fds = [0 as c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(os_error("create report pipe"));
    }
    let [read_fd, write_fd] = fds;
    for fd in fds {
        // Other processes forked and exec'd by the host must not hold the pipe open.
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = os_error("fork worker");
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return Err(err);
    }
    if pid == 0 {
        unsafe {
            libc::close(read_fd);
            worker_main(write_fd, job)
        }
    }

    unsafe { libc::close(write_fd) };
    // SAFETY: `read_fd` is an open descriptor owned by nobody else in this process.
    let reader = unsafe { File::from_raw_fd(read_fd) };
    let cap = HEADER_LEN.saturating_add(max_result_bytes).saturating_add(1);
    let read = read_to_end_capped(reader, cap);
    let status = wait_worker(pid)?;
    let (report, truncated) = read.map_err(|source| WorkerError::Io {
        op: "read worker report",
        source,
    })?;

    classify(status, &report, truncated, max_result_bytes)
}

unsafe fn worker_main<F>(fd: c_int, job: F) -> !
where
    F: FnOnce() -> Vec<u8>,
{
    signal::reset_fatal_signals();
    panic_report::arm(fd);

    let payload = match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(payload) => payload,
        Err(cause) => {
            let message = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic in foreign call".to_string());
            panic_report::report_panic(message.as_bytes())
        }
    };

    let code = match frame::write_all_fd(fd, &frame::encode(Frame::Ok(&payload))) {
        Ok(()) => WORKER_EXIT_OK,
        Err(_) => WORKER_EXIT_IO,
    };
    libc::_exit(code)
}

fn wait_worker(pid: libc::pid_t) -> Result<c_int, WorkerError> {
    let mut status: c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            return Ok(status);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(WorkerError::Io {
                op: "wait for worker",
                source: err,
            });
        }
    }
}

fn classify(
    status: c_int,
    report: &[u8],
    truncated: bool,
    max_result_bytes: usize,
) -> Result<WorkerOutcome, WorkerError> {
    if libc::WIFSIGNALED(status) {
        return Ok(WorkerOutcome::Signaled(libc::WTERMSIG(status)));
    }
    let code = if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else {
        return Err(WorkerError::Exited { status });
    };

    if truncated {
        return Err(WorkerError::ResultTooLarge {
            max: max_result_bytes,
        });
    }
    if report.is_empty() {
        return Err(WorkerError::MissingFrame { status: code });
    }

    match frame::decode(report, max_result_bytes) {
        Ok(Frame::Ok(payload)) if code == WORKER_EXIT_OK => {
            Ok(WorkerOutcome::Completed(payload.to_vec()))
        }
        Ok(Frame::Panic(message)) if code == WORKER_EXIT_PANIC => Ok(WorkerOutcome::Panicked(
            String::from_utf8_lossy(message).into_owned(),
        )),
        Ok(_) => Err(WorkerError::Exited { status: code }),
        Err(FrameError::TooLarge { .. }) => Err(WorkerError::ResultTooLarge {
            max: max_result_bytes,
        }),
        Err(err) if code == WORKER_EXIT_IO => Err(WorkerError::Io {
            op: "worker report",
            source: io::Error::new(io::ErrorKind::BrokenPipe, err),
        }),
        Err(err) => Err(WorkerError::Frame(err)),
    }
}

/// Reads everything, keeping at most `cap` bytes. Returns whether anything was dropped.
pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_job_returns_its_payload() {
        let out = run_isolated(1024, || b"from the worker".to_vec()).unwrap();
        assert_eq!(out, WorkerOutcome::Completed(b"from the worker".to_vec()));
    }

    #[test]
    fn signal_in_job_is_observed() {
        let out = run_isolated(1024, || {
            unsafe { libc::raise(libc::SIGBUS) };
            Vec::new()
        })
        .unwrap();
        assert_eq!(out, WorkerOutcome::Signaled(libc::SIGBUS));
    }

    #[test]
    fn reported_panic_is_observed() {
        let out = run_isolated(1024, || panic_report::report_panic(b"gave up")).unwrap();
        assert_eq!(out, WorkerOutcome::Panicked("gave up".to_string()));
    }

    #[test]
    fn rust_panic_in_job_is_a_panic_report() {
        let out = run_isolated(1024, || panic!("unwound")).unwrap();
        assert_eq!(out, WorkerOutcome::Panicked("unwound".to_string()));
    }

    #[test]
    fn silent_exit_is_a_protocol_violation() {
        let err = run_isolated(1024, || unsafe { libc::_exit(3) }).unwrap_err();
        assert!(matches!(err, WorkerError::MissingFrame { status: 3 }), "{err:?}");
    }

    #[test]
    fn oversized_result_is_rejected() {
        let err = run_isolated(16, || vec![7u8; 20_000]).unwrap_err();
        assert!(matches!(err, WorkerError::ResultTooLarge { max: 16 }), "{err:?}");
    }

    #[test]
    fn capped_read_keeps_prefix() {
        let (buf, truncated) = read_to_end_capped(&b"abcdef"[..], 4).unwrap();
        assert_eq!(buf, b"abcd");
        assert!(truncated);
        let (buf, truncated) = read_to_end_capped(&b"ab"[..], 4).unwrap();
        assert_eq!(buf, b"ab");
        assert!(!truncated);
    }
}
