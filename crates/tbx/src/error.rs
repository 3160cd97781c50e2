//! 💀 Errors: the ways a batch run can go sideways, each with a name tag.
//!
//! 🧠 Knowledge graph:
//! - [`RowFault`]: what a single transform handler says when a row is the wrong shape.
//! - [`PipelineError`]: the run-level taxonomy. Only `LookupFailure`, `SourceIo` and
//!   `SinkIo` are fatal. The row-level variants get logged and rolled up at pass end.
//!   `ChunkWriteFailure` lands in the upload report and the show goes on.
//! - [`StoreError`]: the remote record store said no, or never said anything at all.
//! - [`PayloadError`]: a shape asked for a column the row does not have.
//!
//! Application plumbing still rides on `anyhow` with `.context(...)`. These enums
//! exist for the places where the caller has to branch on *which* thing broke. 🦆

use std::path::PathBuf;

use thiserror::Error;

/// 🐛 Why a single row could not be processed by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowFault {
    #[error("field index {index} is out of range for a row of {width} fields")]
    IndexOutOfRange { index: usize, width: usize },
    #[error("field {index} holds '{value}', which is not a valid {expected}")]
    BadValue {
        index: usize,
        value: String,
        expected: &'static str,
    },
}

/// 🚨 The run-level error taxonomy.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 📐 Row shape does not match the operation's index expectations. Recovered locally.
    #[error("{operation}: malformed row at line {line}: {fault}")]
    MalformedRow {
        operation: &'static str,
        line: usize,
        fault: RowFault,
    },
    /// 🚫 Row is well-formed but failed a business predicate. Recovered locally.
    #[error("{operation}: row at line {line} rejected ({identifier})")]
    RejectedRow {
        operation: &'static str,
        line: usize,
        identifier: String,
    },
    /// 🔍 A lookup sub-batch failed. Fatal to the whole resolve call.
    #[error("lookup against '{object}' failed on sub-batch {batch} of {batches}")]
    LookupFailure {
        object: String,
        batch: usize,
        batches: usize,
        #[source]
        source: StoreError,
    },
    /// 📦 One upload chunk failed. Recorded, never fatal.
    #[error("chunk {chunk} write to '{object}' failed")]
    ChunkWriteFailure {
        object: String,
        chunk: usize,
        #[source]
        source: StoreError,
    },
    /// 📂 The row source could not be opened or read. Fatal.
    #[error("row source '{}' could not be read", path.display())]
    SourceIo {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    /// 📝 The pass output could not be written. Fatal.
    #[error("row sink '{}' could not be written", path.display())]
    SinkIo {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// 📡 The remote record store boundary failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to the record store could not be completed")]
    Transport(#[from] reqwest::Error),
    #[error("record store answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("record store response could not be decoded")]
    Decode(#[from] serde_json::Error),
    #[error("{failed} of {total} records were rejected, first error: {first_error}")]
    Rejected {
        failed: usize,
        total: usize,
        first_error: String,
    },
    #[error("'{0}' is not a valid object or field name")]
    InvalidIdentifier(String),
    #[error("record store URL is invalid: {0}")]
    InvalidUrl(String),
    #[error("record store refused the call: {0}")]
    Refused(String),
}

/// 🧱 PayloadBuilder could not map a row onto its shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("shape '{shape}' field '{field}' reads column {index}, but the row only has {width} fields")]
    IndexOutOfRange {
        shape: String,
        field: String,
        index: usize,
        width: usize,
    },
    #[error("shape '{shape}' field '{field}' expects an integer, got '{value}'")]
    NotAnInteger {
        shape: String,
        field: String,
        value: String,
    },
    #[error("no payload shape named '{0}'")]
    UnknownShape(String),
}

/// 🔗 `outer: inner: innermost`, the same shape anyhow's `{:#}` prints.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
