//! 🧾 Rows: reading and writing the positional tabular format every pass speaks.
//!
//! Delimiter is a comma. Quoting is a lie we refuse to believe: a field containing a
//! comma becomes two fields, exactly like the SAP extracts this tool was born to eat.
//! Rows are self-describing in width only. Blank lines vanish. Bytes that are not UTF-8
//! get the replacement-character treatment rather than taking the whole file down. 🦆
//!
//! 🧠 Knowledge graph:
//! - [`RowStream`]: lazy, finite, single-pass iterator over rows.
//! - [`RowWriter`]: the mirror image. Joins with commas, adds a newline, no opinions.
//! - [`select_column`], [`select_all`], [`find_value`]: the file-level query helpers.
//! - [`read_all`], [`write_all`]: for when the file fits in RAM and you are feeling lucky.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use tracing::warn;

use crate::common::{JoinTable, Row};
use crate::error::PipelineError;

/// 📂 A lazy, single-pass stream of rows from a comma-delimited source.
pub struct RowStream<R: Read = File> {
    path: PathBuf,
    records: csv::ByteRecordsIntoIter<R>,
}

impl<R: Read> std::fmt::Debug for RowStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream").field("path", &self.path).finish()
    }
}

fn reader_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(false).flexible(true).quoting(false);
    builder
}

impl RowStream<File> {
    /// 🚀 Open a file as a row stream. Missing file = `SourceIo`, which is fatal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let reader = reader_builder()
            .from_path(&path)
            .map_err(|source| PipelineError::SourceIo {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            records: reader.into_byte_records(),
        })
    }
}

impl<R: Read> RowStream<R> {
    /// 🧪 Stream rows out of anything readable. `label` only shows up in errors.
    pub fn from_reader(label: impl Into<PathBuf>, reader: R) -> Self {
        Self {
            path: label.into(),
            records: reader_builder().from_reader(reader).into_byte_records(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Read> Iterator for RowStream<R> {
    type Item = Result<Row, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(
            record
                .map(|record| {
                    record
                        .iter()
                        .map(|field| String::from_utf8_lossy(field).into_owned())
                        .collect()
                })
                .map_err(|source| PipelineError::SourceIo {
                    path: self.path.clone(),
                    source,
                }),
        )
    }
}

/// 📝 Writes rows back out: fields joined by commas, one row per line, no quoting.
pub struct RowWriter<W: Write = File> {
    path: PathBuf,
    writer: csv::Writer<W>,
    written: usize,
}

fn writer_builder() -> WriterBuilder {
    let mut builder = WriterBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .quote_style(QuoteStyle::Never);
    builder
}

impl RowWriter<File> {
    /// 🚀 Create (or truncate) the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let writer = writer_builder()
            .from_path(&path)
            .map_err(|source| PipelineError::SinkIo {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer,
            written: 0,
        })
    }
}

impl<W: Write> RowWriter<W> {
    pub fn from_writer(label: impl Into<PathBuf>, writer: W) -> Self {
        Self {
            path: label.into(),
            writer: writer_builder().from_writer(writer),
            written: 0,
        }
    }

    /// ✍️ Write one row. Zero-width rows are skipped: a blank line would not survive a
    /// re-read anyway.
    pub fn write_row(&mut self, row: &[String]) -> Result<(), PipelineError> {
        if row.is_empty() {
            return Ok(());
        }
        self.writer
            .write_record(row)
            .map_err(|source| PipelineError::SinkIo {
                path: self.path.clone(),
                source,
            })?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// 🏁 Flush and hand back the underlying writer.
    pub fn finish(self) -> Result<W, PipelineError> {
        let path = self.path;
        self.writer
            .into_inner()
            .map_err(|err| PipelineError::SinkIo {
                path,
                source: csv::Error::from(err.into_error()),
            })
    }
}

/// 📥 Slurp a whole file into memory.
pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Row>, PipelineError> {
    RowStream::open(path)?.collect()
}

/// 📤 Write a whole batch of rows. Returns how many made it to disk.
pub fn write_all(path: impl AsRef<Path>, rows: &[Row]) -> Result<usize, PipelineError> {
    let mut writer = RowWriter::create(path)?;
    for row in rows {
        writer.write_row(row)?;
    }
    let written = writer.written();
    writer.finish()?;
    Ok(written)
}

/// 🔍 Every value of column `col`, in file order. Rows too short to have that column
/// are logged and skipped.
pub fn select_column(path: impl AsRef<Path>, col: usize) -> Result<Vec<String>, PipelineError> {
    let stream = RowStream::open(path)?;
    let mut values = Vec::new();
    for (idx, row) in stream.enumerate() {
        let mut row = row?;
        if col < row.len() {
            values.push(row.swap_remove(col));
        } else {
            warn!(
                line = idx + 1,
                col,
                width = row.len(),
                "⚠️ select_column: row too short, skipping"
            );
        }
    }
    Ok(values)
}

/// 🗂️ Build a join table: column `key_col` becomes the key and the rest of the row
/// (key removed) becomes the value. Duplicate keys: the last row wins.
pub fn select_all(path: impl AsRef<Path>, key_col: usize) -> Result<JoinTable, PipelineError> {
    let stream = RowStream::open(path)?;
    let mut table = JoinTable::new();
    for (idx, row) in stream.enumerate() {
        let mut row = row?;
        if key_col < row.len() {
            let key = row.remove(key_col);
            table.insert(key, row);
        } else {
            warn!(
                line = idx + 1,
                key_col,
                width = row.len(),
                "⚠️ select_all: row has no key column, skipping"
            );
        }
    }
    Ok(table)
}

/// 🔎 The first row containing a field exactly equal to `value`, as
/// `(value, the row's other fields)`. `None` if nobody in the file has it.
pub fn find_value(
    path: impl AsRef<Path>,
    value: &str,
) -> Result<Option<(String, Row)>, PipelineError> {
    for row in RowStream::open(path)? {
        let mut row = row?;
        if let Some(position) = row.iter().position(|field| field == value) {
            let found = row.remove(position);
            return Ok(Some((found, row)));
        }
    }
    Ok(None)
}
