//! 📦 Uploads: carve a record collection into fixed-size chunks, one remote write each.
//!
//! 🧠 Knowledge graph:
//! - The collection is drained front to back, `chunk_size` records at a time, so the
//!   chunks concatenate back into the original order and the caller is left holding an
//!   empty `Vec` when we are done.
//! - A failed chunk is recorded (with its last record, for whoever has to go find it)
//!   and the next chunk goes out anyway. Maximal forward progress.
//! - [`WriteOp`] is passed straight through to the store. Upsert carries its key field,
//!   insert carries nothing, delete carries soft/hard.
//!
//! Ancient proverb: "He who aborts the batch on chunk 3 of 400 re-runs chunks 1 and 2." 🦆

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use serde::Deserialize;
use tracing::{error, info};

use crate::common::Record;
use crate::error::{PipelineError, error_chain};
use crate::progress::UploadProgress;
use crate::store::{DeleteMode, RecordStore, WriteKind};

/// ✍️ Which remote write each chunk becomes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    Insert,
    Upsert { key_field: String },
    Delete {
        #[serde(default)]
        mode: DeleteMode,
    },
}

impl WriteOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Upsert { .. } => "upsert",
            Self::Delete {
                mode: DeleteMode::Soft,
            } => "delete",
            Self::Delete {
                mode: DeleteMode::Hard,
            } => "hard_delete",
        }
    }

    pub fn kind(&self) -> WriteKind {
        match self {
            Self::Insert => WriteKind::Insert,
            Self::Upsert { .. } => WriteKind::Upsert,
            Self::Delete { mode } => WriteKind::Delete(*mode),
        }
    }
}

/// 📬 How one chunk went.
#[derive(Debug)]
pub enum UploadOutcome {
    Written {
        chunk: usize,
        records: usize,
    },
    Failed {
        chunk: usize,
        records: usize,
        /// last record of the failed chunk, for diagnostics
        last_record: Option<Record>,
        error: PipelineError,
    },
}

/// 📊 Aggregate of every chunk in one upload call.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub object: String,
    pub operation: String,
    pub outcomes: Vec<UploadOutcome>,
}

impl UploadReport {
    pub fn chunks(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded_chunks(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UploadOutcome::Written { .. }))
            .count()
    }

    pub fn failed_chunks(&self) -> usize {
        self.chunks() - self.succeeded_chunks()
    }

    pub fn records_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                UploadOutcome::Written { records, .. } => *records,
                UploadOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn records_failed(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                UploadOutcome::Failed { records, .. } => *records,
                UploadOutcome::Written { .. } => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UploadOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UploadOutcome::Failed { .. }))
    }

    /// 📨 One human-readable paragraph, for the notifier.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} {}: {} of {} chunks succeeded ({} records written, {} records failed).",
            self.operation,
            self.object,
            self.succeeded_chunks(),
            self.chunks(),
            self.records_written(),
            self.records_failed()
        );
        for outcome in self.failures() {
            if let UploadOutcome::Failed {
                chunk,
                last_record,
                error,
                ..
            } = outcome
            {
                let last = last_record
                    .as_ref()
                    .map(|r| serde_json::Value::Object(r.clone()).to_string())
                    .unwrap_or_default();
                text.push_str(&format!(
                    "\nchunk {chunk}: {} (last record {last})",
                    error_chain(error)
                ));
            }
        }
        text
    }
}

/// 📦 Chunked writer over any [`RecordStore`].
#[derive(Debug, Clone, Copy)]
pub struct BatchUploader {
    chunk_size: NonZeroUsize,
}

impl BatchUploader {
    /// A chunk size of zero is refused: it would never make progress.
    pub fn new(chunk_size: usize) -> anyhow::Result<Self> {
        let chunk_size = NonZeroUsize::new(chunk_size)
            .ok_or_else(|| anyhow::anyhow!("💀 chunk_size must be at least 1"))?;
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// 📏 Refuse a chunk size the store cannot take in one call, before any chunk goes
    /// out. Otherwise every chunk would fail the same way.
    pub fn check_fits<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        op: &WriteOp,
    ) -> anyhow::Result<()> {
        match store.max_records_per_call(op.kind()) {
            Some(max) if self.chunk_size.get() > max => anyhow::bail!(
                "💀 chunk_size {} is too big for {}: the store takes at most {max} records per call. \
                 Set chunk_size to {max} or less.",
                self.chunk_size,
                op.name()
            ),
            _ => Ok(()),
        }
    }

    /// 🚚 Drain `records` into the store, chunk by chunk, in order.
    pub async fn upload<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        object: &str,
        op: &WriteOp,
        records: &mut Vec<Record>,
    ) -> UploadReport {
        let mut report = UploadReport {
            object: object.to_string(),
            operation: op.name().to_string(),
            outcomes: Vec::new(),
        };
        let mut progress = UploadProgress::new(
            format!("{} {object}", op.name()),
            records.len() as u64,
        );
        let mut chunk_no = 0;
        // -- moved into a deque once, so each chunk comes off the front without shifting the rest
        let mut pending: VecDeque<Record> = std::mem::take(records).into();

        while !pending.is_empty() {
            let take = pending.len().min(self.chunk_size.get());
            let chunk: Vec<Record> = pending.drain(..take).collect();
            chunk_no += 1;

            let result = match op {
                WriteOp::Insert => store.insert(object, &chunk).await,
                WriteOp::Upsert { key_field } => store.upsert(object, key_field, &chunk).await,
                WriteOp::Delete { mode } => store.delete(object, &chunk, *mode).await,
            };

            match result {
                Ok(_) => {
                    progress.record_chunk(chunk.len() as u64, true);
                    report.outcomes.push(UploadOutcome::Written {
                        chunk: chunk_no,
                        records: chunk.len(),
                    });
                }
                Err(source) => {
                    let error = PipelineError::ChunkWriteFailure {
                        object: object.to_string(),
                        chunk: chunk_no,
                        source,
                    };
                    error!("📦 {}", error_chain(&error));
                    progress.record_chunk(chunk.len() as u64, false);
                    let records = chunk.len();
                    report.outcomes.push(UploadOutcome::Failed {
                        chunk: chunk_no,
                        records,
                        last_record: chunk.into_iter().last(),
                        error,
                    });
                }
            }
        }
        progress.finish();

        info!(
            "📦 {} {object}: {} chunks ok, {} failed, {} records written",
            op.name(),
            report.succeeded_chunks(),
            report.failed_chunks(),
            report.records_written()
        );
        report
    }
}
