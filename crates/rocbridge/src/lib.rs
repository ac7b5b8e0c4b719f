pub mod foreign;
pub mod report;

pub use foreign::{retain_host_symbols, ForeignLibrary, LoadError};
pub use report::CallReport;
