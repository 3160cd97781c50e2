//! 🚂 Pipeline: runs the configured steps in order, one at a time, against one store
//! and one notifier.
//!
//! 🧠 Knowledge graph:
//! - [`StepConfig`]: what a step is, as written in TOML (`step = "transform"`, ...).
//! - `RunContext`: the row file the next step reads, the pass counter, and every named
//!   [`KeyMapping`] / [`JoinTable`] built so far. Mappings and tables are `Arc`ed and
//!   never touched again once inserted.
//! - [`RunReport`]: every pass report, every upload report, and one [`StepSummary`]
//!   per step for the end-of-run table.
//!
//! Failure policy, in one place:
//! - Row-level trouble is counted, reported at the end of the pass, and the run goes on.
//! - A failed upload chunk is reported, and the run goes on.
//! - Anything else (source I/O, lookup failure, a reference to a mapping nobody built)
//!   is fatal: the primary audience hears about it first, then it is logged, then the
//!   run stops. 🛑

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::app_config::{AppConfig, SourceConfig};
use crate::common::{JoinTable, Record, RecordErrorSink, dirty_data_body};
use crate::lookup::{KeyMapping, LookupRequest, LookupResolver};
use crate::notify::{Audience, Notifier, NotifierBackend, Severity};
use crate::payload::{PayloadBuilder, PayloadShape};
use crate::relational::{RelationalSource, SqlQuery, load_each, load_table, materialize};
use crate::rows::{read_all, select_all, select_column};
use crate::store::{DeleteMode, RecordStore, StoreBackend};
use crate::transforms::{OperationConfig, PassOptions, PassReport, pass_output_path, run_pass};
use crate::upload::{BatchUploader, UploadReport, WriteOp};

fn default_id_field() -> String {
    "Id".to_string()
}

fn default_chunk_size() -> usize {
    200
}

fn default_max_keys_per_query() -> usize {
    200
}

fn yes() -> bool {
    true
}

/// 📚 Where a join table's rows come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TableSource {
    /// a row file on disk
    File { path: PathBuf },
    /// one relational query
    Query { query: SqlQuery },
    /// one relational query per value of `key_column` in the current row file
    PerKey { per_key: SqlQuery, key_column: usize },
}

/// 🪜 One step of the run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepConfig {
    /// Pull rows out of the relational source into the staging area. Later steps read them.
    Extract {
        query: SqlQuery,
        #[serde(default)]
        name: Option<String>,
    },
    /// One transform pass over the current row file.
    Transform {
        operation: OperationConfig,
        #[serde(default)]
        unique_col: Option<usize>,
    },
    /// Natural keys from `column` of the current row file → remote ids, stored as `name`.
    Resolve {
        name: String,
        column: usize,
        object: String,
        key_field: String,
        #[serde(default = "default_id_field")]
        id_field: String,
        #[serde(default)]
        reverse: bool,
        #[serde(default = "yes")]
        fold_case: bool,
        #[serde(default = "default_max_keys_per_query")]
        max_keys_per_query: usize,
    },
    /// One wildcard query → mapping stored as `name`.
    ResolveLike {
        name: String,
        object: String,
        field: String,
        pattern: String,
        #[serde(default = "default_id_field")]
        id_field: String,
        #[serde(default)]
        reverse: bool,
    },
    /// Build a join table for `join_dict_to_csv`, stored as `name`.
    LoadTable {
        name: String,
        key_col: usize,
        #[serde(flatten)]
        from: TableSource,
    },
    /// Current row file → payloads → chunked writes.
    Upload {
        shape: String,
        object: String,
        write: WriteOp,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
        #[serde(default)]
        unique_col: Option<usize>,
    },
    /// Delete every id in a named mapping.
    Delete {
        mapping: String,
        object: String,
        #[serde(default)]
        mode: DeleteMode,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },
}

impl StepConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extract { .. } => "extract",
            Self::Transform { .. } => "transform",
            Self::Resolve { .. } => "resolve",
            Self::ResolveLike { .. } => "resolve_like",
            Self::LoadTable { .. } => "load_table",
            Self::Upload { .. } => "upload",
            Self::Delete { .. } => "delete",
        }
    }
}

/// 🧾 One line of the end-of-run table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    /// 1-based position in the configured step list
    pub step: usize,
    pub kind: String,
    pub detail: String,
    pub ok: usize,
    pub problems: usize,
}

/// 📊 Everything a finished run has to say for itself.
#[derive(Debug, Default)]
pub struct RunReport {
    pub passes: Vec<PassReport>,
    pub uploads: Vec<UploadReport>,
    pub steps: Vec<StepSummary>,
}

/// 🎒 State carried from one step to the next.
#[derive(Debug, Default)]
struct RunContext {
    current: Option<PathBuf>,
    pass: usize,
    mappings: HashMap<String, Arc<KeyMapping>>,
    tables: HashMap<String, Arc<JoinTable>>,
}

impl RunContext {
    fn current(&self) -> anyhow::Result<&Path> {
        self.current.as_deref().context(
            "💀 No row file to work on: set source.path or put an extract step first",
        )
    }

    fn mapping(&self, name: &str) -> anyhow::Result<Arc<KeyMapping>> {
        self.mappings
            .get(name)
            .cloned()
            .with_context(|| format!("💀 No earlier step built a key mapping called '{name}'"))
    }
}

/// 🚂 The orchestrator.
#[derive(Debug)]
pub struct Pipeline<S: RecordStore = StoreBackend, N: Notifier = NotifierBackend> {
    source: SourceConfig,
    shapes: Vec<PayloadShape>,
    steps: Vec<StepConfig>,
    store: S,
    notifier: N,
    relational: Option<Box<dyn RelationalSource>>,
}

impl Pipeline<StoreBackend, NotifierBackend> {
    /// 🏗️ Build the notifier, then the store. A store that cannot connect is a fatal
    /// error, and the notifier is already there to report it.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let notifier = NotifierBackend::from_config(&config.notify)?;
        let store = match StoreBackend::from_config(&config.store).await {
            Ok(store) => store,
            Err(err) => {
                let body = format!("Could not connect to the record store: {err:#}");
                announce(&notifier, Severity::Error, Audience::Primary, &body).await;
                error!("💀 {body}");
                return Err(err);
            }
        };
        let relational = config
            .relational
            .build()
            .map(|source| Box::new(source) as Box<dyn RelationalSource>);
        Ok(Self::new(config, store, notifier).with_relational(relational))
    }
}

impl<S: RecordStore, N: Notifier> Pipeline<S, N> {
    pub fn new(config: AppConfig, store: S, notifier: N) -> Self {
        Self {
            source: config.source,
            shapes: config.shapes,
            steps: config.steps,
            store,
            notifier,
            relational: None,
        }
    }

    pub fn with_relational(mut self, relational: Option<Box<dyn RelationalSource>>) -> Self {
        self.relational = relational;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 🏁 Run every step in order. Stops at the first fatal error.
    pub async fn run(&self) -> anyhow::Result<RunReport> {
        let mut ctx = RunContext {
            current: self.source.path.clone(),
            ..RunContext::default()
        };
        let mut report = RunReport::default();

        if let Err(err) = std::fs::create_dir_all(&self.source.staging_dir).with_context(|| {
            format!(
                "💀 Could not create staging directory {}",
                self.source.staging_dir.display()
            )
        }) {
            return Err(self.fatal("Preparing the staging area", err).await);
        }

        info!("🚂 Running {} steps", self.steps.len());
        for (idx, step) in self.steps.iter().enumerate() {
            let number = idx + 1;
            match self.run_step(number, step, &mut ctx, &mut report).await {
                Ok(summary) => {
                    info!(
                        "🚂 Step {number} ({}): {} ok, {} problems. {}",
                        summary.kind, summary.ok, summary.problems, summary.detail
                    );
                    report.steps.push(summary);
                }
                Err(err) => {
                    let what = format!("Step {number} ({})", step.kind());
                    return Err(self.fatal(&what, err).await);
                }
            }
        }
        info!("🏁 Run complete");
        Ok(report)
    }

    async fn fatal(&self, what: &str, err: anyhow::Error) -> anyhow::Error {
        let body = format!("{what} failed: {err:#}");
        announce(&self.notifier, Severity::Error, Audience::Primary, &body).await;
        error!("💀 {body}");
        err.context(format!("{what} failed"))
    }

    async fn run_step(
        &self,
        number: usize,
        step: &StepConfig,
        ctx: &mut RunContext,
        report: &mut RunReport,
    ) -> anyhow::Result<StepSummary> {
        let summary = |detail: String, ok: usize, problems: usize| StepSummary {
            step: number,
            kind: step.kind().to_string(),
            detail,
            ok,
            problems,
        };

        match step {
            StepConfig::Extract { query, name } => {
                let source = self.relational.as_deref().context(
                    "💀 An extract step needs a relational source, and none is configured",
                )?;
                let file_name = format!("{}.csv", name.as_deref().unwrap_or("extract"));
                let path = self.source.staging_dir.join(file_name);
                let rows = materialize(source, query, &path).await?;
                ctx.current = Some(path.clone());
                Ok(summary(path.display().to_string(), rows, 0))
            }

            StepConfig::Transform {
                operation,
                unique_col,
            } => {
                let input = ctx.current()?.to_path_buf();
                let spec = operation.resolve(&ctx.mappings, &ctx.tables)?;
                ctx.pass += 1;
                let output = pass_output_path(&self.source.staging_dir, &input, ctx.pass);
                let pass = run_pass(&spec, &input, &output, &PassOptions::new(*unique_col))?;

                if let Some(body) = dirty_data_body(&pass.error_rows) {
                    announce(&self.notifier, Severity::Info, Audience::Secondary, &body).await;
                }
                let line = summary(
                    format!("{} → {}", pass.operation, output.display()),
                    pass.rows_written,
                    pass.malformed + pass.rejected,
                );
                ctx.current = Some(output);
                report.passes.push(pass);
                Ok(line)
            }

            StepConfig::Resolve {
                name,
                column,
                object,
                key_field,
                id_field,
                reverse,
                fold_case,
                max_keys_per_query,
            } => {
                let mut keys = select_column(ctx.current()?, *column)?;
                let request = LookupRequest {
                    object: object.clone(),
                    key_field: key_field.clone(),
                    id_field: id_field.clone(),
                    reverse: *reverse,
                    fold_case: *fold_case,
                    max_keys_per_query: *max_keys_per_query,
                };
                let resolution = LookupResolver::new(&self.store)
                    .resolve(&request, &mut keys)
                    .await?;
                let resolved = resolution.mapping.len();
                ctx.mappings
                    .insert(name.clone(), Arc::new(resolution.mapping));
                Ok(summary(
                    format!(
                        "{name}: {object}.{key_field} in {} queries",
                        resolution.queries
                    ),
                    resolved,
                    0,
                ))
            }

            StepConfig::ResolveLike {
                name,
                object,
                field,
                pattern,
                id_field,
                reverse,
            } => {
                let request = LookupRequest {
                    id_field: id_field.clone(),
                    reverse: *reverse,
                    ..LookupRequest::new(object.clone(), field.clone())
                };
                let resolution = LookupResolver::new(&self.store)
                    .resolve_like(&request, pattern)
                    .await?;
                let resolved = resolution.mapping.len();
                ctx.mappings
                    .insert(name.clone(), Arc::new(resolution.mapping));
                Ok(summary(
                    format!("{name}: {object}.{field} LIKE '{pattern}'"),
                    resolved,
                    0,
                ))
            }

            StepConfig::LoadTable {
                name,
                key_col,
                from,
            } => {
                let table = match from {
                    TableSource::File { path } => select_all(path, *key_col)?,
                    TableSource::Query { query } => {
                        load_table(self.relational_source()?, query, *key_col).await?
                    }
                    TableSource::PerKey {
                        per_key,
                        key_column,
                    } => {
                        let keys = select_column(ctx.current()?, *key_column)?;
                        load_each(self.relational_source()?, per_key, &keys, *key_col).await?
                    }
                };
                let keys = table.len();
                ctx.tables.insert(name.clone(), Arc::new(table));
                Ok(summary(name.clone(), keys, 0))
            }

            StepConfig::Upload {
                shape,
                object,
                write,
                chunk_size,
                unique_col,
            } => {
                let uploader = BatchUploader::new(*chunk_size)?;
                uploader.check_fits(&self.store, write)?;
                let rows = read_all(ctx.current()?)?;
                let builder = PayloadBuilder::named(&self.shapes, shape)?;

                let mut errors = RecordErrorSink::new();
                let mut payload_errors = 0;
                let mut records: Vec<Record> = Vec::with_capacity(rows.len());
                for (idx, row) in rows.iter().enumerate() {
                    match builder.build(row) {
                        Ok(record) => records.push(record),
                        Err(err) => {
                            payload_errors += 1;
                            warn!(line = idx + 1, row = %row.join(","), "🧱 {err}");
                            if let Some(id) = unique_col.and_then(|col| row.get(col)) {
                                errors.record(id.clone());
                            }
                        }
                    }
                }
                if let Some(body) = dirty_data_body(&errors.drain()) {
                    announce(&self.notifier, Severity::Info, Audience::Secondary, &body).await;
                }

                let upload = uploader
                    .upload(&self.store, object, write, &mut records)
                    .await;
                self.announce_upload(&upload).await;
                let line = summary(
                    format!("{} {object}, shape {shape}", write.name()),
                    upload.records_written(),
                    upload.records_failed() + payload_errors,
                );
                report.uploads.push(upload);
                Ok(line)
            }

            StepConfig::Delete {
                mapping,
                object,
                mode,
                chunk_size,
            } => {
                let op = WriteOp::Delete { mode: *mode };
                let uploader = BatchUploader::new(*chunk_size)?;
                uploader.check_fits(&self.store, &op)?;
                let mut records = ctx.mapping(mapping)?.to_delete_records();
                let upload = uploader
                    .upload(&self.store, object, &op, &mut records)
                    .await;
                self.announce_upload(&upload).await;
                let line = summary(
                    format!("{} {object}, ids from {mapping}", op.name()),
                    upload.records_written(),
                    upload.records_failed(),
                );
                report.uploads.push(upload);
                Ok(line)
            }
        }
    }

    fn relational_source(&self) -> anyhow::Result<&dyn RelationalSource> {
        self.relational
            .as_deref()
            .context("💀 This step needs a relational source, and none is configured")
    }

    async fn announce_upload(&self, upload: &UploadReport) {
        let severity = if upload.failed_chunks() == 0 {
            Severity::Success
        } else {
            Severity::Error
        };
        announce(&self.notifier, severity, Audience::Primary, &upload.summary()).await;
    }
}

/// 📣 Send a notice. A notifier that fails is logged and otherwise ignored.
async fn announce<N: Notifier + ?Sized>(
    notifier: &N,
    severity: Severity,
    audience: Audience,
    body: &str,
) {
    if let Err(err) = notifier.notify(severity, audience, body).await {
        warn!("📭 Could not deliver a {severity:?} notice: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Row;
    use crate::notify::{Notice, RecordingNotifier};
    use crate::relational::{CannedResult, InMemoryRelationalSource};
    use crate::rows::write_all;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn row(fields: &[&str]) -> Row {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    /// 🧪 Parse a TOML run config, pointing `source.path` at a fresh file with `rows`.
    fn setup(
        dir: &Path,
        rows: &[Row],
        toml_body: &str,
    ) -> anyhow::Result<AppConfig> {
        let input = dir.join("source.csv");
        write_all(&input, rows)?;
        let text = format!(
            "[source]\npath = {:?}\nstaging_dir = {:?}\n{toml_body}",
            input.display().to_string(),
            dir.join("stage").display().to_string(),
        );
        let config: AppConfig = toml::from_str(&text)?;
        Ok(config)
    }

    #[tokio::test]
    async fn the_one_where_two_contacts_find_their_ids_and_go_home() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(
            dir.path(),
            &[row(&["x@y.com", "Smith"]), row(&["a@b.com", "Jones"])],
            r#"
            [[shapes]]
            name = "contact"
            fields = [{ field = "Id", column = 2 }, { field = "LastName", column = 1 }]

            [[steps]]
            step = "resolve"
            name = "contacts"
            column = 0
            object = "Contact"
            key_field = "Email"

            [[steps]]
            step = "transform"
            operation = { op = "tack_sfid", mapping = "contacts" }

            [[steps]]
            step = "upload"
            shape = "contact"
            object = "Contact"
            write = { op = "upsert", key_field = "Id" }
            chunk_size = 1
            "#,
        )?;
        let store = InMemoryStore::new();
        store
            .seed(
                "Contact",
                [
                    record(json!({"Id": "ID1", "Email": "x@y.com"})),
                    record(json!({"Id": "ID2", "Email": "a@b.com"})),
                ],
            )
            .await;
        let notifier = RecordingNotifier::new();

        let report = Pipeline::new(config, store.clone(), notifier.clone())
            .run()
            .await?;

        let enriched = report.passes[0]
            .output
            .as_ref()
            .map(read_all)
            .transpose()?
            .unwrap_or_default();
        assert_eq!(
            enriched,
            vec![
                row(&["x@y.com", "Smith", "ID1"]),
                row(&["a@b.com", "Jones", "ID2"])
            ]
        );

        let writes = store.writes().await;
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.kind == "upsert" && w.records.len() == 1));
        let upload = &report.uploads[0];
        assert_eq!((upload.succeeded_chunks(), upload.failed_chunks()), (2, 0));

        let notices = notifier.notices().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Success);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[2].ok, 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_dirty_rows_get_reported_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(
            dir.path(),
            &[
                row(&["m1", "Gold", "2020"]),
                row(&["m2", "Sil", "ver", "2021"]),
                row(&["m2", "Sil", "ver", "2021"]),
                row(&["m3", "Bronze", "2022"]),
            ],
            r#"
            [[steps]]
            step = "transform"
            operation = { op = "purge", col_length = 3, unique_col = 0 }
            "#,
        )?;
        let notifier = RecordingNotifier::new();

        let report = Pipeline::new(config, InMemoryStore::new(), notifier.clone())
            .run()
            .await?;

        assert_eq!(report.passes[0].rows_written, 2);
        assert_eq!(report.passes[0].error_rows, vec!["m2".to_string()]);
        assert_eq!(
            notifier.notices().await,
            vec![Notice {
                severity: Severity::Info,
                audience: Audience::Secondary,
                body: "Dirty data - skipped records:\nm2\n".into(),
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_source_file_is_a_ghost() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = setup(
            dir.path(),
            &[],
            r#"
            [[steps]]
            step = "transform"
            operation = { op = "remove_header" }
            "#,
        )?;
        config.source.path = Some(dir.path().join("nope.csv"));
        let notifier = RecordingNotifier::new();

        let result = Pipeline::new(config, InMemoryStore::new(), notifier.clone())
            .run()
            .await;

        let err = result.expect_err("missing source is fatal");
        assert!(format!("{err:#}").contains("Step 1 (transform) failed"));
        let notices = notifier.notices().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Error);
        assert_eq!(notices[0].audience, Audience::Primary);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_tack_sfid_names_a_mapping_nobody_built() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(
            dir.path(),
            &[row(&["x@y.com"])],
            r#"
            [[steps]]
            step = "transform"
            operation = { op = "tack_sfid", mapping = "ghosts" }
            "#,
        )?;
        let result = Pipeline::new(config, InMemoryStore::new(), RecordingNotifier::new())
            .run()
            .await;
        assert!(format!("{:#}", result.expect_err("unknown mapping")).contains("ghosts"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_chunk_does_not_stop_the_train() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(
            dir.path(),
            &[row(&["a"]), row(&["b"]), row(&["c"])],
            r#"
            [[shapes]]
            name = "thing"
            fields = [{ field = "Name", column = 0 }]

            [[steps]]
            step = "upload"
            shape = "thing"
            object = "Thing"
            write = { op = "insert" }
            chunk_size = 1

            [[steps]]
            step = "transform"
            operation = { op = "tack_custom_val", value = "after" }
            "#,
        )?;
        let store = InMemoryStore::new();
        store.fail_write_call(2).await;
        let notifier = RecordingNotifier::new();

        let report = Pipeline::new(config, store.clone(), notifier.clone())
            .run()
            .await?;

        assert_eq!(report.uploads[0].failed_chunks(), 1);
        assert_eq!(report.steps[0].problems, 1);
        assert_eq!(report.steps.len(), 2, "the run carried on past the failed chunk");
        assert_eq!(store.records("Thing").await.len(), 2);
        assert_eq!(notifier.notices().await[0].severity, Severity::Error);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_oversized_chunk_stops_before_the_first_call() -> anyhow::Result<()> {
        use crate::store::{SalesforceConfig, SalesforceStore};
        use wiremock::MockServer;

        let dir = tempfile::tempdir()?;
        let config = setup(
            dir.path(),
            &[row(&["a"]), row(&["b"])],
            r#"
            [[shapes]]
            name = "thing"
            fields = [{ field = "Name", column = 0 }]

            [[steps]]
            step = "upload"
            shape = "thing"
            object = "Thing"
            write = { op = "insert" }
            chunk_size = 500
            "#,
        )?;
        let server = MockServer::start().await;
        let store = SalesforceStore::connect(&SalesforceConfig {
            instance_url: Some(server.uri()),
            access_token: Some("tok".into()),
            ..SalesforceConfig::default()
        })
        .await?;
        let notifier = RecordingNotifier::new();

        let result = Pipeline::new(config, store, notifier.clone()).run().await;

        let err = format!("{:#}", result.expect_err("chunk_size 500 is a config error"));
        assert!(err.contains("Step 1 (upload) failed"), "{err}");
        assert!(err.contains("chunk_size 500"), "{err}");
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
        let notices = notifier.notices().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Error);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_payload_errors_are_dirty_data_too() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(
            dir.path(),
            &[row(&["k1", "5"]), row(&["k2", "five"])],
            r#"
            [[shapes]]
            name = "visits"
            fields = [{ field = "Key__c", column = 0 }, { field = "Visits__c", column = 1, kind = "integer" }]

            [[steps]]
            step = "upload"
            shape = "visits"
            object = "Member__c"
            write = { op = "upsert", key_field = "Key__c" }
            unique_col = 0
            "#,
        )?;
        let notifier = RecordingNotifier::new();

        let report = Pipeline::new(config, InMemoryStore::new(), notifier.clone())
            .run()
            .await?;

        assert_eq!(report.uploads[0].records_written(), 1);
        assert_eq!(report.steps[0].problems, 1);
        let notices = notifier.notices().await;
        assert_eq!(notices[0].body, "Dirty data - skipped records:\nk2\n");
        assert_eq!(notices[1].severity, Severity::Success);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_mapping_becomes_a_delete_list() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(
            dir.path(),
            &[],
            r#"
            [[steps]]
            step = "resolve_like"
            name = "stale"
            object = "Opportunity"
            field = "Name"
            pattern = "2019 %"
            reverse = true

            [[steps]]
            step = "delete"
            mapping = "stale"
            object = "Opportunity"
            "#,
        )?;
        let store = InMemoryStore::new();
        store
            .seed(
                "Opportunity",
                [
                    record(json!({"Name": "2019 Renewal"})),
                    record(json!({"Name": "2019 Renewal"})),
                    record(json!({"Name": "2024 Renewal"})),
                ],
            )
            .await;

        let report = Pipeline::new(config, store.clone(), RecordingNotifier::new())
            .run()
            .await?;

        assert_eq!(report.steps[0].ok, 2, "reverse keeps both same-named deals");
        assert_eq!(store.recycle_bin("Opportunity").await.len(), 2);
        assert_eq!(store.records("Opportunity").await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_left_join_table_comes_from_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let lookup = dir.path().join("tiers.csv");
        write_all(&lookup, &[row(&["GOLD", "Gold Tier", "G"]), row(&["SILV", "Silver Tier", "S"])])?;
        let config = setup(
            dir.path(),
            &[row(&["m1", "GOLD"]), row(&["m2", "PLAT"])],
            &format!(
                r#"
                [[steps]]
                step = "load_table"
                name = "tiers"
                key_col = 0
                path = {:?}

                [[steps]]
                step = "transform"
                operation = {{ op = "join_dict_to_csv", table = "tiers", match_col = 1, col = 1 }}
                "#,
                lookup.display().to_string()
            ),
        )?;

        let report = Pipeline::new(config, InMemoryStore::new(), RecordingNotifier::new())
            .run()
            .await?;

        let joined = report.passes[0]
            .output
            .as_ref()
            .map(read_all)
            .transpose()?
            .unwrap_or_default();
        assert_eq!(joined, vec![row(&["m1", "GOLD", "G"])]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_rows_start_life_in_a_database() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = setup(
            dir.path(),
            &[],
            r#"
            [[steps]]
            step = "extract"
            name = "members"
            query = { text = "select id, links_id from members" }

            [[steps]]
            step = "load_table"
            name = "visits"
            key_col = 0
            per_key = { text = "select links_id, last_visit from visits where links_id = ?" }
            key_column = 1
            "#,
        )?;
        config.source.path = None;
        let relational = InMemoryRelationalSource::new([
            CannedResult {
                query: SqlQuery::new("select id, links_id from members"),
                rows: vec![row(&["m1", "L1"])],
            },
            CannedResult {
                query: SqlQuery::new("select links_id, last_visit from visits where links_id = ?")
                    .bind("L1"),
                rows: vec![row(&["L1", "2024-01-02"])],
            },
        ]);

        let report = Pipeline::new(config, InMemoryStore::new(), RecordingNotifier::new())
            .with_relational(Some(Box::new(relational)))
            .run()
            .await?;

        assert_eq!(report.steps[0].ok, 1);
        assert!(report.steps[0].detail.ends_with("members.csv"));
        assert_eq!(report.steps[1].ok, 1);
        Ok(())
    }

    #[test]
    fn the_one_where_step_defaults_fill_themselves_in() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Holder {
            steps: Vec<StepConfig>,
        }
        let holder: Holder = toml::from_str(
            r#"
            [[steps]]
            step = "resolve"
            name = "contacts"
            column = 0
            object = "Contact"
            key_field = "Email"
            "#,
        )?;
        assert_eq!(
            holder.steps[0],
            StepConfig::Resolve {
                name: "contacts".into(),
                column: 0,
                object: "Contact".into(),
                key_field: "Email".into(),
                id_field: "Id".into(),
                reverse: false,
                fold_case: true,
                max_keys_per_query: 200,
            }
        );
        assert_eq!(holder.steps[0].kind(), "resolve");
        Ok(())
    }
}
