use std::ffi::c_int;
use std::fmt;

use rocbridge_abi::{AllocError, MarshalError};

use crate::worker::WorkerError;

#[derive(Debug)]
pub enum CallError {
    /// The foreign code was terminated by a fatal signal.
    Trap {
        signal: c_int,
        description: String,
        suffix: String,
    },
    /// The foreign code called `roc_panic`.
    Panic { message: String, suffix: String },
    Alloc(AllocError),
    Marshal(MarshalError),
    Worker(WorkerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    Trap,
    Panic,
    Alloc,
    Marshal,
    Worker,
}

impl CallErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallErrorKind::Trap => "trap",
            CallErrorKind::Panic => "panic",
            CallErrorKind::Alloc => "alloc",
            CallErrorKind::Marshal => "marshal",
            CallErrorKind::Worker => "worker",
        }
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CallError {
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::Trap { .. } => CallErrorKind::Trap,
            CallError::Panic { .. } => CallErrorKind::Panic,
            CallError::Alloc(_) => CallErrorKind::Alloc,
            CallError::Marshal(_) => CallErrorKind::Marshal,
            CallError::Worker(_) => CallErrorKind::Worker,
        }
    }

    /// Terminating signal of a trap.
    pub fn signal(&self) -> Option<c_int> {
        match self {
            CallError::Trap { signal, .. } => Some(*signal),
            _ => None,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Trap {
                description,
                suffix,
                ..
            } => write!(f, "{description}{suffix}"),
            CallError::Panic { message, suffix } => write!(f, "{message}{suffix}"),
            CallError::Alloc(err) => write!(f, "{err}"),
            CallError::Marshal(err) => write!(f, "{err}"),
            CallError::Worker(err) => write!(f, "foreign call worker failed: {err}"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Alloc(err) => Some(err),
            CallError::Marshal(err) => Some(err),
            CallError::Worker(err) => Some(err),
            CallError::Trap { .. } | CallError::Panic { .. } => None,
        }
    }
}

impl From<AllocError> for CallError {
    fn from(err: AllocError) -> Self {
        CallError::Alloc(err)
    }
}

impl From<MarshalError> for CallError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::Alloc(err) => CallError::Alloc(err),
            other => CallError::Marshal(other),
        }
    }
}

impl From<WorkerError> for CallError {
    fn from(err: WorkerError) -> Self {
        CallError::Worker(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_and_panic_render_cause_then_suffix() {
        let suffix = " signal caught while running the `hello` function in main.roc".to_string();
        let trap = CallError::Trap {
            signal: libc::SIGSEGV,
            description: "Segmentation fault".to_string(),
            suffix: suffix.clone(),
        };
        assert_eq!(
            trap.to_string(),
            "Segmentation fault signal caught while running the `hello` function in main.roc"
        );
        assert_eq!(trap.signal(), Some(libc::SIGSEGV));
        assert_eq!(trap.kind().as_str(), "trap");

        let panic = CallError::Panic {
            message: "boom".to_string(),
            suffix,
        };
        assert_eq!(
            panic.to_string(),
            "boom signal caught while running the `hello` function in main.roc"
        );
        assert_eq!(panic.signal(), None);
    }

    #[test]
    fn marshal_alloc_failures_surface_as_alloc() {
        let alloc = AllocError {
            size: 16,
            alignment: 1,
        };
        let err = CallError::from(MarshalError::Alloc(alloc));
        assert_eq!(err.kind(), CallErrorKind::Alloc);

        let err = CallError::from(MarshalError::InvalidUtf8 { valid_up_to: 3 });
        assert_eq!(err.kind(), CallErrorKind::Marshal);
    }
}
