//! 🔄 Transforms: one operation, one full traversal of the rows, one [`PassReport`].
//!
//! 🧠 Knowledge graph:
//! - [`TransformSpec`]: the resolved, runnable operation. Each variant has exactly one
//!   handler in a submodule (`reshape`, `values`, `filters`, `joins`, `dedupe`).
//! - [`OperationConfig`]: the same catalog as it appears in TOML, with mappings and
//!   join tables referenced by name instead of held by `Arc`.
//! - [`run_pass`]: file → file. [`apply_rows`]: rows → rows, in memory. Same engine.
//! - A pass has two states: streaming, then finalizing. Only `de-duplicate` has
//!   anything to do in the second one.
//!
//! Per-row faults never stop a pass. The row is logged with its line number, counted,
//! and (when the pass knows its `unique_col`) its identifier joins the error-row set
//! that gets drained into the report at the end. 🦆

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::common::{JoinTable, RecordErrorSink, Row};
use crate::error::{PipelineError, RowFault};
use crate::lookup::KeyMapping;
use crate::rows::{RowStream, RowWriter};

pub mod dedupe;
pub mod filters;
pub mod joins;
pub mod reshape;
pub mod values;

pub use dedupe::{Deduplicator, dictify};

/// 🧩 One piece of a `concat_n_tack` field: a literal, or a column reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ConcatPart {
    Field(usize),
    Literal(String),
}

/// 🔄 A runnable operation, with every reference already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformSpec {
    RemoveHeader,
    Boolify {
        col: usize,
        orig_true: String,
        orig_false: String,
        new_true: String,
        new_false: String,
    },
    SwapColumns {
        from: usize,
        to: usize,
    },
    DeleteColumn {
        col: usize,
    },
    Deduplicate {
        col: usize,
    },
    TackSfid {
        mapping: Arc<KeyMapping>,
    },
    TackDateBasedOnCondition {
        col: usize,
        matches: Vec<String>,
        years: u32,
    },
    YyyymmddToIso {
        cols: Vec<usize>,
    },
    ConcatNTack {
        parts: Vec<ConcatPart>,
    },
    TackCustomVal {
        value: String,
    },
    ConvertTime {
        col: usize,
    },
    RemoveMissingCols,
    RemoveRowBasedOnVal {
        col: usize,
        value: String,
        report_col: usize,
    },
    StripTime {
        cols: Vec<usize>,
    },
    JoinDictToCsv {
        table: Arc<JoinTable>,
        match_col: usize,
        col: usize,
    },
    Purge {
        col_length: usize,
        unique_col: usize,
    },
}

impl TransformSpec {
    /// 🏷️ The catalog name, as it shows up in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RemoveHeader => "remove_header",
            Self::Boolify { .. } => "boolify",
            Self::SwapColumns { .. } => "swap_columns",
            Self::DeleteColumn { .. } => "delete_column",
            Self::Deduplicate { .. } => "de-duplicate",
            Self::TackSfid { .. } => "tack_sfid",
            Self::TackDateBasedOnCondition { .. } => "tack_date_based_on_condition",
            Self::YyyymmddToIso { .. } => "yyyymmdd_to_yyyy-mm-dd",
            Self::ConcatNTack { .. } => "concat_n_tack",
            Self::TackCustomVal { .. } => "tack_custom_val",
            Self::ConvertTime { .. } => "convert_time",
            Self::RemoveMissingCols => "remove_missing_cols",
            Self::RemoveRowBasedOnVal { .. } => "remove_row_based_on_val",
            Self::StripTime { .. } => "strip_time",
            Self::JoinDictToCsv { .. } => "join_dict_to_csv",
            Self::Purge { .. } => "purge",
        }
    }
}

/// 📋 The operation catalog as written in config. `mapping` and `table` are names of
/// key mappings and join tables built by earlier pipeline steps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op")]
pub enum OperationConfig {
    #[serde(rename = "remove_header")]
    RemoveHeader,
    #[serde(rename = "boolify")]
    Boolify {
        col: usize,
        orig_true: String,
        orig_false: String,
        new_true: String,
        new_false: String,
    },
    #[serde(rename = "swap_columns")]
    SwapColumns { from: usize, to: usize },
    #[serde(rename = "delete_column")]
    DeleteColumn { col: usize },
    #[serde(rename = "de-duplicate", alias = "deduplicate")]
    Deduplicate { col: usize },
    #[serde(rename = "tack_sfid")]
    TackSfid { mapping: String },
    #[serde(rename = "tack_date_based_on_condition")]
    TackDateBasedOnCondition {
        col: usize,
        matches: Vec<String>,
        years: u32,
    },
    #[serde(rename = "yyyymmdd_to_yyyy-mm-dd", alias = "yyyymmdd_to_iso")]
    YyyymmddToIso { cols: Vec<usize> },
    #[serde(rename = "concat_n_tack")]
    ConcatNTack { parts: Vec<ConcatPart> },
    #[serde(rename = "tack_custom_val")]
    TackCustomVal { value: String },
    #[serde(rename = "convert_time")]
    ConvertTime { col: usize },
    #[serde(rename = "remove_missing_cols")]
    RemoveMissingCols,
    #[serde(rename = "remove_row_based_on_val")]
    RemoveRowBasedOnVal {
        col: usize,
        value: String,
        report_col: usize,
    },
    #[serde(rename = "strip_time")]
    StripTime { cols: Vec<usize> },
    #[serde(rename = "join_dict_to_csv")]
    JoinDictToCsv {
        table: String,
        match_col: usize,
        col: usize,
    },
    #[serde(rename = "purge")]
    Purge { col_length: usize, unique_col: usize },
}

impl OperationConfig {
    /// 🔗 Swap names for the real mappings and tables. Unknown name = config error.
    pub fn resolve(
        &self,
        mappings: &HashMap<String, Arc<KeyMapping>>,
        tables: &HashMap<String, Arc<JoinTable>>,
    ) -> anyhow::Result<TransformSpec> {
        Ok(match self.clone() {
            Self::RemoveHeader => TransformSpec::RemoveHeader,
            Self::Boolify {
                col,
                orig_true,
                orig_false,
                new_true,
                new_false,
            } => TransformSpec::Boolify {
                col,
                orig_true,
                orig_false,
                new_true,
                new_false,
            },
            Self::SwapColumns { from, to } => TransformSpec::SwapColumns { from, to },
            Self::DeleteColumn { col } => TransformSpec::DeleteColumn { col },
            Self::Deduplicate { col } => TransformSpec::Deduplicate { col },
            Self::TackSfid { mapping } => TransformSpec::TackSfid {
                mapping: mappings.get(&mapping).cloned().ok_or_else(|| {
                    anyhow::anyhow!(
                        "💀 tack_sfid wants key mapping '{mapping}', but no earlier step built one"
                    )
                })?,
            },
            Self::TackDateBasedOnCondition {
                col,
                matches,
                years,
            } => TransformSpec::TackDateBasedOnCondition {
                col,
                matches,
                years,
            },
            Self::YyyymmddToIso { cols } => TransformSpec::YyyymmddToIso { cols },
            Self::ConcatNTack { parts } => TransformSpec::ConcatNTack { parts },
            Self::TackCustomVal { value } => TransformSpec::TackCustomVal { value },
            Self::ConvertTime { col } => TransformSpec::ConvertTime { col },
            Self::RemoveMissingCols => TransformSpec::RemoveMissingCols,
            Self::RemoveRowBasedOnVal {
                col,
                value,
                report_col,
            } => TransformSpec::RemoveRowBasedOnVal {
                col,
                value,
                report_col,
            },
            Self::StripTime { cols } => TransformSpec::StripTime { cols },
            Self::JoinDictToCsv {
                table,
                match_col,
                col,
            } => TransformSpec::JoinDictToCsv {
                table: tables.get(&table).cloned().ok_or_else(|| {
                    anyhow::anyhow!(
                        "💀 join_dict_to_csv wants join table '{table}', but no earlier step loaded one"
                    )
                })?,
                match_col,
                col,
            },
            Self::Purge {
                col_length,
                unique_col,
            } => TransformSpec::Purge {
                col_length,
                unique_col,
            },
        })
    }
}

/// ⚖️ What a handler decided about one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// write the (possibly rewritten) row
    Keep,
    /// omit quietly
    Drop,
    /// omit and remember the identifier, if the row had one
    Reject(Option<String>),
    /// the operation took the row for its finalize step
    Absorbed,
}

/// 📏 Borrow field `index` or explain why not.
pub(crate) fn field(row: &[String], index: usize) -> Result<&str, RowFault> {
    row.get(index)
        .map(String::as_str)
        .ok_or(RowFault::IndexOutOfRange {
            index,
            width: row.len(),
        })
}

/// 🎛️ Knobs for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOptions {
    /// index whose value names a malformed row in the error-row set
    pub unique_col: Option<usize>,
    /// "today", for operations that stamp dates
    pub today: NaiveDate,
}

impl PassOptions {
    pub fn new(unique_col: Option<usize>) -> Self {
        Self {
            unique_col,
            today: Local::now().date_naive(),
        }
    }
}

impl Default for PassOptions {
    fn default() -> Self {
        Self::new(None)
    }
}

/// 📊 How a pass went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub operation: String,
    pub rows_read: usize,
    pub rows_written: usize,
    pub dropped: usize,
    pub malformed: usize,
    pub rejected: usize,
    /// drained from the pass's error sink, sorted, one entry per identifier
    pub error_rows: Vec<String>,
    pub output: Option<PathBuf>,
}

/// 🔧 An operation plus the state it carries across one pass.
struct Operation<'a> {
    spec: &'a TransformSpec,
    header_pending: bool,
    stamped_date: String,
    dedupe: Deduplicator,
}

impl<'a> Operation<'a> {
    fn prepare(spec: &'a TransformSpec, today: NaiveDate) -> Self {
        let stamped_date = match spec {
            TransformSpec::TackDateBasedOnCondition { years, .. } => {
                values::years_from(today, *years)
            }
            _ => String::new(),
        };
        Self {
            spec,
            header_pending: matches!(spec, TransformSpec::RemoveHeader),
            stamped_date,
            dedupe: Deduplicator::default(),
        }
    }

    fn apply(&mut self, row: &mut Row) -> Result<Verdict, RowFault> {
        match self.spec {
            TransformSpec::RemoveHeader => {
                if std::mem::take(&mut self.header_pending) {
                    Ok(Verdict::Drop)
                } else {
                    Ok(Verdict::Keep)
                }
            }
            TransformSpec::Boolify {
                col,
                orig_true,
                orig_false,
                new_true,
                new_false,
            } => values::boolify(
                row,
                *col,
                (orig_true.as_str(), new_true.as_str()),
                (orig_false.as_str(), new_false.as_str()),
            ),
            TransformSpec::SwapColumns { from, to } => reshape::swap_columns(row, *from, *to),
            TransformSpec::DeleteColumn { col } => reshape::delete_column(row, *col),
            TransformSpec::Deduplicate { col } => self.dedupe.absorb(row, *col),
            TransformSpec::TackSfid { mapping } => joins::tack_sfid(row, mapping),
            TransformSpec::TackDateBasedOnCondition { col, matches, .. } => {
                values::tack_date_based_on_condition(row, *col, matches, &self.stamped_date)
            }
            TransformSpec::YyyymmddToIso { cols } => values::yyyymmdd_to_iso(row, cols),
            TransformSpec::ConcatNTack { parts } => reshape::concat_n_tack(row, parts),
            TransformSpec::TackCustomVal { value } => reshape::tack_custom_val(row, value),
            TransformSpec::ConvertTime { col } => values::convert_time(row, *col),
            TransformSpec::RemoveMissingCols => reshape::remove_missing_cols(row),
            TransformSpec::RemoveRowBasedOnVal {
                col,
                value,
                report_col,
            } => filters::remove_row_based_on_val(row, *col, value, *report_col),
            TransformSpec::StripTime { cols } => values::strip_time(row, cols),
            TransformSpec::JoinDictToCsv {
                table,
                match_col,
                col,
            } => joins::join_dict_to_csv(row, table, *match_col, *col),
            TransformSpec::Purge {
                col_length,
                unique_col,
            } => filters::purge(row, *col_length, *unique_col),
        }
    }

    /// 🏁 Finalizing state. Empty for everything except de-duplicate.
    fn finish(self) -> Vec<Row> {
        self.dedupe.finish()
    }
}

/// 🚂 The shared engine loop. `E` is whatever the row source and sink can fail with.
fn drive<E, I, F>(
    spec: &TransformSpec,
    rows: I,
    options: &PassOptions,
    mut emit: F,
) -> Result<PassReport, E>
where
    I: IntoIterator<Item = Result<Row, E>>,
    F: FnMut(Row) -> Result<(), E>,
{
    let operation_name = spec.name();
    let mut operation = Operation::prepare(spec, options.today);
    let mut errors = RecordErrorSink::new();
    let mut report = PassReport {
        operation: operation_name.to_string(),
        ..PassReport::default()
    };

    // -- 🌊 streaming
    for (idx, row) in rows.into_iter().enumerate() {
        let mut row = row?;
        let line = idx + 1;
        report.rows_read += 1;

        match operation.apply(&mut row) {
            Ok(Verdict::Keep) if row.is_empty() => report.dropped += 1,
            Ok(Verdict::Keep) => {
                emit(row)?;
                report.rows_written += 1;
            }
            Ok(Verdict::Drop) => report.dropped += 1,
            Ok(Verdict::Absorbed) => {}
            Ok(Verdict::Reject(identifier)) => {
                report.rejected += 1;
                let rejected = PipelineError::RejectedRow {
                    operation: operation_name,
                    line,
                    identifier: identifier.clone().unwrap_or_else(|| "?".to_string()),
                };
                debug!("🚫 {rejected}");
                if let Some(identifier) = identifier {
                    errors.record(identifier);
                }
            }
            Err(fault) => {
                report.malformed += 1;
                let malformed = PipelineError::MalformedRow {
                    operation: operation_name,
                    line,
                    fault,
                };
                warn!(row = %row.join(","), "⚠️ {malformed}");
                if let Some(id) = options.unique_col.and_then(|col| row.get(col)) {
                    errors.record(id.clone());
                }
            }
        }
    }

    // -- 🏁 finalizing
    for row in operation.finish() {
        emit(row)?;
        report.rows_written += 1;
    }

    report.error_rows = errors.drain();
    info!(
        "🔄 {operation_name}: read {} wrote {} dropped {} malformed {} rejected {}",
        report.rows_read, report.rows_written, report.dropped, report.malformed, report.rejected
    );
    Ok(report)
}

/// 📂 File → file. Opens `input`, runs the operation over every row, writes `output`.
///
/// A source or sink I/O failure aborts the pass. Everything row-level does not.
pub fn run_pass(
    spec: &TransformSpec,
    input: &Path,
    output: &Path,
    options: &PassOptions,
) -> Result<PassReport, PipelineError> {
    let stream = RowStream::open(input)?;
    let mut writer = RowWriter::create(output)?;
    let mut report = drive(spec, stream, options, |row| writer.write_row(&row))?;
    writer.finish()?;
    report.output = Some(output.to_path_buf());
    Ok(report)
}

/// 🧠 Rows → rows, entirely in memory.
pub fn apply_rows(
    spec: &TransformSpec,
    rows: impl IntoIterator<Item = Row>,
    options: &PassOptions,
) -> (Vec<Row>, PassReport) {
    let mut out = Vec::new();
    let Ok(report) = drive::<Infallible, _, _>(spec, rows.into_iter().map(Ok), options, |row| {
        out.push(row);
        Ok(())
    });
    (out, report)
}

/// 🏷️ `<staging_dir>/<input stem>_p<pass>.csv`
///
/// Never the input itself: writing there would truncate the file mid-read.
pub fn pass_output_path(staging_dir: &Path, input: &Path, pass: usize) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rows".to_string());
    // -- a pass over a pass output keeps the original stem, not stem_p1_p2_p3
    let base = match stem.rsplit_once("_p") {
        Some((base, n)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => base,
        _ => stem.as_str(),
    };
    let output = staging_dir.join(format!("{base}_p{pass}.csv"));
    if output == input {
        // -- source already wears this pass's name, so stack the suffix instead
        return staging_dir.join(format!("{stem}_p{pass}.csv"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn rows(data: &[&[&str]]) -> Vec<Row> {
        data.iter()
            .map(|r| r.iter().map(|f| f.to_string()).collect())
            .collect()
    }

    #[test]
    fn the_one_where_the_header_leaves_and_nobody_else_does() {
        let (out, report) = apply_rows(
            &TransformSpec::RemoveHeader,
            rows(&[&["id", "name"], &["1", "a"], &["id", "name"]]),
            &PassOptions::default(),
        );
        assert_eq!(out, rows(&[&["1", "a"], &["id", "name"]]));
        assert_eq!((report.rows_read, report.rows_written, report.dropped), (3, 2, 1));
    }

    #[test]
    fn the_one_where_dedupe_lets_the_last_word_win() {
        let (out, report) = apply_rows(
            &TransformSpec::Deduplicate { col: 0 },
            rows(&[&["a", "1"], &["a", "2"], &["b", "3"]]),
            &PassOptions::default(),
        );
        assert_eq!(out, rows(&[&["a", "2"], &["b", "3"]]));
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.rows_written, 2);
    }

    #[test]
    fn the_one_where_purge_names_each_culprit_once() {
        let (out, report) = apply_rows(
            &TransformSpec::Purge {
                col_length: 3,
                unique_col: 0,
            },
            rows(&[
                &["100", "ok", "row"],
                &["200", "split", "by", "comma"],
                &["200", "again", "too", "wide"],
                &["300", "short"],
            ]),
            &PassOptions::default(),
        );
        assert_eq!(out, rows(&[&["100", "ok", "row"]]), "passing rows are verbatim");
        assert_eq!(report.rejected, 3);
        assert_eq!(report.error_rows, vec!["200".to_string(), "300".to_string()]);
    }

    #[test]
    fn the_one_where_a_short_row_does_not_stop_the_show() {
        let (out, report) = apply_rows(
            &TransformSpec::ConvertTime { col: 2 },
            rows(&[&["A1", "x", "164510"], &["A2"], &["A3", "y", "000001"]]),
            &PassOptions::new(Some(0)),
        );
        assert_eq!(out, rows(&[&["A1", "x", "60310000"], &["A3", "y", "1000"]]));
        assert_eq!(report.malformed, 1);
        assert_eq!(report.error_rows, vec!["A2".to_string()]);
    }

    #[test]
    fn the_one_where_malformed_rows_without_unique_col_are_only_counted() {
        let (_, report) = apply_rows(
            &TransformSpec::DeleteColumn { col: 5 },
            rows(&[&["a", "b"]]),
            &PassOptions::default(),
        );
        assert_eq!(report.malformed, 1);
        assert!(report.error_rows.is_empty());
    }

    #[test]
    fn the_one_where_the_date_is_stamped_once_for_the_whole_pass() -> anyhow::Result<()> {
        let today = NaiveDate::from_ymd_opt(2024, 2, 29).ok_or_else(|| anyhow::anyhow!("date"))?;
        let (out, _) = apply_rows(
            &TransformSpec::TackDateBasedOnCondition {
                col: 1,
                matches: vec![String::new(), "N/A".into()],
                years: 1,
            },
            rows(&[&["1", ""], &["2", "2030-01-01"], &["3", "N/A"]]),
            &PassOptions {
                unique_col: None,
                today,
            },
        );
        assert_eq!(
            out,
            rows(&[
                &["1", "", "2025-02-28"],
                &["2", "2030-01-01", "2030-01-01"],
                &["3", "N/A", "2025-02-28"],
            ])
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_file_pass_lands_in_the_staging_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("contacts.csv");
        std::fs::write(&input, "x@y.com,Smith\nbroken\na@b.com,Jones\n")?;
        let output = pass_output_path(dir.path(), &input, 1);
        assert_eq!(output, dir.path().join("contacts_p1.csv"));

        let report = run_pass(
            &TransformSpec::TackCustomVal {
                value: "SAP".into(),
            },
            &input,
            &output,
            &PassOptions::default(),
        )?;

        assert_eq!(report.rows_written, 3);
        assert_eq!(report.output.as_deref(), Some(output.as_path()));
        assert_eq!(
            std::fs::read_to_string(&output)?,
            "x@y.com,Smith,SAP\nbroken,SAP\na@b.com,Jones,SAP\n"
        );
        assert_eq!(
            pass_output_path(dir.path(), &output, 2),
            dir.path().join("contacts_p2.csv")
        );
        Ok(())
    }

    #[test]
    fn the_one_where_the_source_already_wears_the_pass_one_name() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("x_p1.csv");
        std::fs::write(&input, "a,b\nc,d\n")?;

        let output = pass_output_path(dir.path(), &input, 1);
        assert_ne!(output, input);
        assert_eq!(output, dir.path().join("x_p1_p1.csv"));

        run_pass(
            &TransformSpec::TackCustomVal { value: "z".into() },
            &input,
            &output,
            &PassOptions::default(),
        )?;
        assert_eq!(std::fs::read_to_string(&input)?, "a,b\nc,d\n", "source untouched");
        assert_eq!(std::fs::read_to_string(&output)?, "a,b,z\nc,d,z\n");
        Ok(())
    }

    #[test]
    fn the_one_where_a_missing_input_aborts_before_any_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = run_pass(
            &TransformSpec::RemoveMissingCols,
            &dir.path().join("nope.csv"),
            &dir.path().join("out.csv"),
            &PassOptions::default(),
        );
        assert!(matches!(result, Err(PipelineError::SourceIo { .. })));
    }

    #[test]
    fn the_one_where_config_names_resolve_to_real_tables() -> anyhow::Result<()> {
        let mut mappings = HashMap::new();
        mappings.insert("contacts".to_string(), Arc::new(KeyMapping::default()));
        let tables = HashMap::new();

        let spec = OperationConfig::TackSfid {
            mapping: "contacts".into(),
        }
        .resolve(&mappings, &tables)?;
        assert_eq!(spec.name(), "tack_sfid");

        let missing = OperationConfig::JoinDictToCsv {
            table: "accounts".into(),
            match_col: 0,
            col: 1,
        }
        .resolve(&mappings, &tables);
        assert!(missing.is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_toml_speaks_the_catalog_names() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Holder {
            ops: Vec<OperationConfig>,
        }
        let parsed: Holder = toml::from_str(
            r#"
            ops = [
                { op = "de-duplicate", col = 0 },
                { op = "yyyymmdd_to_yyyy-mm-dd", cols = [3, 4] },
                { op = "concat_n_tack", parts = ["Renewal", 2, "-", 0] },
                { op = "remove_header" },
            ]
            "#,
        )?;
        assert_eq!(
            parsed.ops,
            vec![
                OperationConfig::Deduplicate { col: 0 },
                OperationConfig::YyyymmddToIso { cols: vec![3, 4] },
                OperationConfig::ConcatNTack {
                    parts: vec![
                        ConcatPart::Literal("Renewal".into()),
                        ConcatPart::Field(2),
                        ConcatPart::Literal("-".into()),
                        ConcatPart::Field(0),
                    ]
                },
                OperationConfig::RemoveHeader,
            ]
        );
        Ok(())
    }
}
