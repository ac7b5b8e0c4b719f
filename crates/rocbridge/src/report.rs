use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use rocbridge_abi::AllocStats;
use rocbridge_boundary::CallError;
use rocbridge_contracts::ROCBRIDGE_CALL_REPORT_SCHEMA_VERSION;

/// JSON report printed by `rocbridge call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReport {
    pub schema_version: String,
    pub ok: bool,
    /// Result as text when it is valid UTF-8.
    pub output: Option<String>,
    pub output_b64: Option<String>,
    pub output_sha256: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub signal: Option<i32>,
    /// Host-side allocator counters for the calling thread.
    #[serde(default)]
    pub alloc_stats: AllocStats,
}

impl CallReport {
    pub fn success(output: &[u8]) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        Self {
            schema_version: ROCBRIDGE_CALL_REPORT_SCHEMA_VERSION.to_string(),
            ok: true,
            output: std::str::from_utf8(output).ok().map(str::to_string),
            output_b64: Some(b64.encode(output)),
            output_sha256: Some(sha256_hex(output)),
            error: None,
            error_kind: None,
            signal: None,
            alloc_stats: AllocStats::default(),
        }
    }

    pub fn failure(err: &CallError) -> Self {
        Self {
            schema_version: ROCBRIDGE_CALL_REPORT_SCHEMA_VERSION.to_string(),
            ok: false,
            output: None,
            output_b64: None,
            output_sha256: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().as_str().to_string()),
            signal: err.signal(),
            alloc_stats: AllocStats::default(),
        }
    }

    pub fn with_alloc_stats(mut self, alloc_stats: AllocStats) -> Self {
        self.alloc_stats = alloc_stats;
        self
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex_lower(&Sha256::digest(bytes))
}

fn hex_lower(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(LUT[(b >> 4) as usize] as char);
        out.push(LUT[(b & 0x0F) as usize] as char);
    }
    out
}
