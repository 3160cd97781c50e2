//! 🗄️ Relational sources: where a pipeline's very first rows come from.
//!
//! The boundary is one capability: run a query, get rows back. Connection lifecycle
//! belongs to whoever implements [`RelationalSource`]. Queries are parameterized
//! ([`SqlQuery`]): the text carries placeholders, the values travel separately, and
//! nothing in here ever glues user data into SQL.
//!
//! Two things get built on top:
//! - [`materialize`]: result set → row file, so it can feed the first transform pass.
//! - [`load_table`] / [`load_each`]: result set(s) → [`JoinTable`] for `join_dict_to_csv`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::common::{JoinTable, Row};
use crate::rows::write_all;

/// 🧾 Query text plus positional parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct SqlQuery {
    pub text: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl SqlQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl std::fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.text)
        } else {
            write!(f, "{} {:?}", self.text, self.params)
        }
    }
}

#[async_trait]
pub trait RelationalSource: std::fmt::Debug + Send + Sync {
    async fn execute(&self, query: &SqlQuery) -> anyhow::Result<Vec<Row>>;
}

/// 🥫 One canned answer for [`InMemoryRelationalSource`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CannedResult {
    #[serde(flatten)]
    pub query: SqlQuery,
    pub rows: Vec<Row>,
}

/// 🧠 Answers queries it has been told about. Anything else is an error, not an
/// empty result, so a typo in a query does not quietly load zero rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRelationalSource {
    results: Arc<HashMap<SqlQuery, Vec<Row>>>,
}

impl InMemoryRelationalSource {
    pub fn new(results: impl IntoIterator<Item = CannedResult>) -> Self {
        Self {
            results: Arc::new(
                results
                    .into_iter()
                    .map(|canned| (canned.query, canned.rows))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl RelationalSource for InMemoryRelationalSource {
    async fn execute(&self, query: &SqlQuery) -> anyhow::Result<Vec<Row>> {
        self.results
            .get(query)
            .cloned()
            .with_context(|| format!("💀 No canned result for query: {query}"))
    }
}

/// 🔧 Which relational source, if any, the run gets.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub enum RelationalConfig {
    #[default]
    Disabled,
    InMemory { results: Vec<CannedResult> },
}

impl RelationalConfig {
    pub fn build(&self) -> Option<InMemoryRelationalSource> {
        match self {
            Self::Disabled => None,
            Self::InMemory { results } => Some(InMemoryRelationalSource::new(results.clone())),
        }
    }
}

/// 💾 Run `query` and write the result set to `path`. Returns the rows written.
pub async fn materialize<S: RelationalSource + ?Sized>(
    source: &S,
    query: &SqlQuery,
    path: &Path,
) -> anyhow::Result<usize> {
    let rows = source
        .execute(query)
        .await
        .with_context(|| format!("💀 Extract query failed: {query}"))?;
    let written = write_all(path, &rows)
        .with_context(|| format!("💀 Could not materialize extract to {}", path.display()))?;
    info!("🗄️ Materialized {written} rows into {}", path.display());
    Ok(written)
}

/// 📚 Run `query` and key every row on `key_col` (key removed, last row wins).
pub async fn load_table<S: RelationalSource + ?Sized>(
    source: &S,
    query: &SqlQuery,
    key_col: usize,
) -> anyhow::Result<JoinTable> {
    let rows = source
        .execute(query)
        .await
        .with_context(|| format!("💀 Reference table query failed: {query}"))?;
    let mut table = JoinTable::new();
    absorb_rows(&mut table, rows, key_col);
    info!("📚 Loaded reference table: {} keys", table.len());
    Ok(table)
}

/// 🔁 One small query per key, all merged into one table. `template` is bound with
/// each key as its last parameter.
pub async fn load_each<S: RelationalSource + ?Sized>(
    source: &S,
    template: &SqlQuery,
    keys: &[String],
    key_col: usize,
) -> anyhow::Result<JoinTable> {
    let mut table = JoinTable::new();
    for key in keys {
        let query = template.clone().bind(key.clone());
        let rows = source
            .execute(&query)
            .await
            .with_context(|| format!("💀 Per-key query failed for '{key}'"))?;
        debug!("🔁 {key}: {} rows", rows.len());
        absorb_rows(&mut table, rows, key_col);
    }
    Ok(table)
}

fn absorb_rows(table: &mut JoinTable, rows: Vec<Row>, key_col: usize) {
    for mut row in rows {
        if key_col >= row.len() {
            warn!("📚 Row of width {} has no key column {key_col}, skipped", row.len());
            continue;
        }
        let key = row.remove(key_col);
        table.insert(key, row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::read_all;

    fn row(fields: &[&str]) -> Row {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn source() -> InMemoryRelationalSource {
        InMemoryRelationalSource::new([
            CannedResult {
                query: SqlQuery::new("select * from members"),
                rows: vec![row(&["m1", "Gold", "2020"]), row(&["m2", "Silver", "2021"])],
            },
            CannedResult {
                query: SqlQuery::new("select last_visit from visits where links_id = ?").bind("L1"),
                rows: vec![row(&["L1", "2024-01-02"])],
            },
            CannedResult {
                query: SqlQuery::new("select last_visit from visits where links_id = ?").bind("L2"),
                rows: vec![row(&["L2", "2024-03-04"]), row(&["L2", "2024-05-06"])],
            },
        ])
    }

    #[tokio::test]
    async fn the_one_where_the_extract_lands_on_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("members.csv");
        let written = materialize(&source(), &SqlQuery::new("select * from members"), &path).await?;
        assert_eq!(written, 2);
        assert_eq!(read_all(&path)?[1], row(&["m2", "Silver", "2021"]));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_reference_table_loses_its_key_column() -> anyhow::Result<()> {
        let table = load_table(&source(), &SqlQuery::new("select * from members"), 0).await?;
        assert_eq!(table.get("m1"), Some(&row(&["Gold", "2020"])));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_every_key_gets_its_own_little_query() -> anyhow::Result<()> {
        let template = SqlQuery::new("select last_visit from visits where links_id = ?");
        let table = load_each(&source(), &template, &["L1".into(), "L2".into()], 0).await?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("L2"), Some(&row(&["2024-05-06"])));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_query_nobody_canned_fails_loudly() {
        let result = source().execute(&SqlQuery::new("select * from typo")).await;
        assert!(result.is_err());
    }

    #[test]
    fn the_one_where_canned_results_parse_from_toml() -> anyhow::Result<()> {
        #[derive(Deserialize)]
        struct Holder {
            relational: RelationalConfig,
        }
        let holder: Holder = toml::from_str(
            r#"
            [[relational.InMemory.results]]
            text = "select * from members"
            rows = [["m1", "Gold"]]
            "#,
        )?;
        let built = holder.relational.build().map(|s| s.results.len());
        assert_eq!(built, Some(1));
        Ok(())
    }
}
