//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for strings and codes that cross a
//! process or crate boundary: the CLI report schema, the worker frame protocol, and the
//! environment variables the boundary reads.

pub const ROCBRIDGE_CALL_REPORT_SCHEMA_VERSION: &str = "rocbridge.call.report@0.1.0";

/// Entry point name used when the caller does not name one.
pub const DEFAULT_ENTRY_NAME: &str = "hello";
/// Source module reported in failure messages when the caller does not name one.
pub const DEFAULT_MODULE_NAME: &str = "main.roc";
/// Symbol the foreign library exports for its single-argument entry point.
pub const DEFAULT_ENTRY_SYMBOL: &str = "roc__mainForHost_1_exposed_generic";

/// Upper bound for a single worker frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// Worker frame tags (`[tag u32 LE][len u32 LE][payload]`).
pub const FRAME_TAG_OK: u32 = 1;
pub const FRAME_TAG_PANIC: u32 = 2;

// Worker exit codes. Anything else (or termination by signal) is a protocol violation
// or a trap.
pub const WORKER_EXIT_OK: i32 = 0;
pub const WORKER_EXIT_PANIC: i32 = 70;
pub const WORKER_EXIT_IO: i32 = 71;

pub const ENV_LOG: &str = "ROCBRIDGE_LOG";
pub const ENV_MAX_RESULT_BYTES: &str = "ROCBRIDGE_MAX_RESULT_BYTES";

/// Text appended to every recovered failure; `{entry}` and `{module}` are substituted.
pub fn failure_suffix(entry: &str, module: &str) -> String {
    format!(" signal caught while running the `{entry}` function in {module}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_names_entry_and_module() {
        assert_eq!(
            failure_suffix(DEFAULT_ENTRY_NAME, DEFAULT_MODULE_NAME),
            " signal caught while running the `hello` function in main.roc"
        );
    }

    #[test]
    fn frame_tags_are_distinct() {
        assert_ne!(FRAME_TAG_OK, FRAME_TAG_PANIC);
        assert_ne!(WORKER_EXIT_PANIC, WORKER_EXIT_IO);
    }
}
