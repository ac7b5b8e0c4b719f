//! Crash-safe calls into foreign code.
//!
//! Each [`Boundary::call`] runs the foreign entry point in a forked worker. A fatal signal
//! or a `roc_panic` ends only the worker; the caller gets a [`CallError`] naming the cause
//! and can keep calling.

#![allow(clippy::missing_safety_doc)]

#[cfg(not(unix))]
compile_error!("rocbridge-boundary requires fork(2)");

pub mod config;
pub mod error;
pub mod frame;
pub mod panic;
pub mod signal;
pub mod worker;

use std::ffi::c_int;
use std::mem::MaybeUninit;

use rocbridge_abi::marshal::{self, HostText};
use rocbridge_abi::{RocBytes, RocStr, RocValue};

pub use config::{BoundaryConfig, ConfigError};
pub use error::{CallError, CallErrorKind};
pub use panic::roc_panic;
pub use worker::{WorkerError, WorkerOutcome};

/// Foreign entry point: writes its result to `out`, reads its single argument from `arg`.
pub type EntryFn<V> = unsafe extern "C" fn(out: *mut V, arg: *const V);

/// What the last failed call ran into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashContext {
    /// Terminating signal; 0 for a panic.
    pub signal: c_int,
    pub message: Option<String>,
}

impl CrashContext {
    /// The panic message, or the platform description of the signal.
    pub fn cause(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => signal::describe(self.signal),
        }
    }
}

pub struct Boundary<V: RocValue> {
    entry: EntryFn<V>,
    config: BoundaryConfig,
    crash: Option<CrashContext>,
}

impl<V: RocValue> Boundary<V> {
    /// # Safety
    /// `entry` must be sound to call with a pointer to writable, uninitialized `V` storage
    /// and a pointer to a valid `V`, and must initialize `*out` unless it ends the worker.
    pub unsafe fn new(entry: EntryFn<V>, config: BoundaryConfig) -> Self {
        Self {
            entry,
            config,
            crash: None,
        }
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    /// The failure recovered by the most recent call, if it failed that way.
    pub fn last_crash(&self) -> Option<&CrashContext> {
        self.crash.as_ref()
    }

    /// Invokes the entry point on `input`, which the call consumes.
    pub fn call(&mut self, input: V) -> Result<V, CallError> {
        self.crash = None;
        let entry = self.entry;
        tracing::debug!(
            entry = %self.config.entry_name,
            kind = V::KIND,
            len = input.content().len(),
            "foreign call armed"
        );

        let outcome = worker::run_isolated(self.config.max_result_bytes, || {
            let mut out = MaybeUninit::<V>::zeroed();
            // SAFETY: upheld by the caller of `Boundary::new`.
            let out = unsafe {
                entry(out.as_mut_ptr(), &input);
                out.assume_init()
            };
            out.into_content()
        });
        drop(input);

        match outcome? {
            WorkerOutcome::Completed(content) => {
                tracing::debug!(
                    entry = %self.config.entry_name,
                    len = content.len(),
                    "foreign call completed"
                );
                Ok(V::from_content(&content)?)
            }
            WorkerOutcome::Panicked(message) => self.recover(CrashContext {
                signal: 0,
                message: Some(message),
            }),
            WorkerOutcome::Signaled(signal) => self.recover(CrashContext {
                signal,
                message: None,
            }),
        }
    }

    fn recover(&mut self, crash: CrashContext) -> Result<V, CallError> {
        let suffix = self.config.failure_suffix();
        let err = match &crash.message {
            Some(message) => CallError::Panic {
                message: message.clone(),
                suffix,
            },
            None => CallError::Trap {
                signal: crash.signal,
                description: crash.cause(),
                suffix,
            },
        };
        tracing::warn!(
            entry = %self.config.entry_name,
            signal = crash.signal,
            kind = %err.kind(),
            "recovered from a failure in foreign code"
        );
        self.crash = Some(crash);
        Err(err)
    }
}

impl Boundary<RocStr> {
    /// Marshals `input` in, calls, and marshals the result out.
    pub fn call_host<H: HostText + ?Sized>(&mut self, input: &H) -> Result<String, CallError> {
        let value = marshal::str_from_host(input)?;
        let out = self.call(value)?;
        Ok(marshal::str_into_host(out)?)
    }
}

impl Boundary<RocBytes> {
    pub fn call_host(&mut self, input: &[u8]) -> Result<Vec<u8>, CallError> {
        let value = marshal::bytes_from_host(input)?;
        let out = self.call(value)?;
        Ok(marshal::bytes_into_host(out))
    }
}
