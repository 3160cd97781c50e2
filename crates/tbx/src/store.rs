//! 📡 Store: the abstract remote record store, and the backends that pretend to be one.
//!
//! 🧠 Knowledge graph:
//! - [`RecordStore`]: the trait. Five operations: query, insert, upsert, soft delete,
//!   hard delete (the last two share `delete` with a [`DeleteMode`]).
//! - [`Query`] + [`Predicate`]: structured queries. Values are escaped on the way to
//!   SOQL and identifiers are validated, so a key like `o'brien@x.com` stays a key.
//! - [`StoreBackend`]: enum dispatch over the concrete stores, built by
//!   [`StoreBackend::from_config`] from a [`StoreConfig`].
//!
//! Every remote call is awaited in sequence. No call runs concurrently with another. 🐢

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::Record;
use crate::error::StoreError;

pub mod in_mem;
pub mod salesforce;

pub use in_mem::InMemoryStore;
pub use salesforce::{SalesforceConfig, SalesforceStore};

/// 🗑️ Soft goes to the recycle bin. Hard goes to the shadow realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Soft,
    Hard,
}

/// 🎯 How a query picks its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `field IN (values...)`, exact match.
    In { field: String, values: Vec<String> },
    /// `field LIKE pattern`, `%` and `_` wildcards.
    Like { field: String, pattern: String },
}

/// 🔍 A structured query: fetch `fields` of `object` where `predicate` holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub object: String,
    pub fields: Vec<String>,
    pub predicate: Predicate,
}

impl Query {
    pub fn new(object: impl Into<String>, fields: &[&str], predicate: Predicate) -> Self {
        Self {
            object: object.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            predicate,
        }
    }

    /// 🧾 Render as SOQL. Identifiers are validated, literals are escaped.
    pub fn to_soql(&self) -> Result<String, StoreError> {
        check_identifier(&self.object)?;
        for field in &self.fields {
            check_identifier(field)?;
        }
        let where_clause = match &self.predicate {
            Predicate::In { field, values } => {
                check_identifier(field)?;
                let quoted: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
                format!("{field} IN ({})", quoted.join(", "))
            }
            Predicate::Like { field, pattern } => {
                check_identifier(field)?;
                format!("{field} LIKE {}", quote_literal(pattern))
            }
        };
        Ok(format!(
            "SELECT {} FROM {} WHERE {where_clause}",
            self.fields.join(", "),
            self.object
        ))
    }
}

/// 🛂 Object and field names: letters, digits, underscores, and dots for relationship paths.
pub fn check_identifier(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// 🧼 Single-quote a SOQL string literal, escaping what SOQL wants escaped.
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

/// ✍️ The kind of write a chunk turns into, as far as a store's limits care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Upsert,
    Delete(DeleteMode),
}

/// 📡 The remote record store contract.
///
/// Writes take a whole chunk and are all-or-nothing per call: either every record in
/// the slice landed, or the call errors and none of them did.
#[async_trait]
pub trait RecordStore: std::fmt::Debug + Send + Sync {
    /// 🔍 Run a query, following pagination until the store says `done`.
    async fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError>;

    async fn insert(&self, object: &str, records: &[Record]) -> Result<usize, StoreError>;

    /// 🔁 Update where `key_field` matches an existing record, insert otherwise.
    async fn upsert(
        &self,
        object: &str,
        key_field: &str,
        records: &[Record],
    ) -> Result<usize, StoreError>;

    /// 🗑️ Every record must carry an `Id`.
    async fn delete(
        &self,
        object: &str,
        records: &[Record],
        mode: DeleteMode,
    ) -> Result<usize, StoreError>;

    /// 📏 Most records a single write call of this kind accepts. `None`: no limit.
    fn max_records_per_call(&self, _kind: WriteKind) -> Option<usize> {
        None
    }
}

/// 🔧 Which store to talk to.
#[derive(Debug, Clone, Deserialize, Default)]
pub enum StoreConfig {
    /// 🧠 RAM only. For tests and dry runs.
    #[default]
    InMemory,
    Salesforce(SalesforceConfig),
}

/// 🎭 Enum dispatch over the concrete stores.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    Salesforce(SalesforceStore),
}

impl StoreBackend {
    /// 🚀 Build (and for Salesforce, authenticate) the configured store.
    pub async fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        match config {
            StoreConfig::InMemory => Ok(Self::InMemory(InMemoryStore::new())),
            StoreConfig::Salesforce(sf) => Ok(Self::Salesforce(SalesforceStore::connect(sf).await?)),
        }
    }
}

#[async_trait]
impl RecordStore for StoreBackend {
    async fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        match self {
            Self::InMemory(store) => store.query(query).await,
            Self::Salesforce(store) => store.query(query).await,
        }
    }

    async fn insert(&self, object: &str, records: &[Record]) -> Result<usize, StoreError> {
        match self {
            Self::InMemory(store) => store.insert(object, records).await,
            Self::Salesforce(store) => store.insert(object, records).await,
        }
    }

    async fn upsert(
        &self,
        object: &str,
        key_field: &str,
        records: &[Record],
    ) -> Result<usize, StoreError> {
        match self {
            Self::InMemory(store) => store.upsert(object, key_field, records).await,
            Self::Salesforce(store) => store.upsert(object, key_field, records).await,
        }
    }

    async fn delete(
        &self,
        object: &str,
        records: &[Record],
        mode: DeleteMode,
    ) -> Result<usize, StoreError> {
        match self {
            Self::InMemory(store) => store.delete(object, records, mode).await,
            Self::Salesforce(store) => store.delete(object, records, mode).await,
        }
    }

    fn max_records_per_call(&self, kind: WriteKind) -> Option<usize> {
        match self {
            Self::InMemory(store) => store.max_records_per_call(kind),
            Self::Salesforce(store) => store.max_records_per_call(kind),
        }
    }
}

/// 🆔 Pull a record's field out as a string, whatever JSON type it arrived as.
/// Nulls and nested objects are not identifiers.
pub fn field_as_string(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_an_apostrophe_stays_inside_its_quotes() -> anyhow::Result<()> {
        let query = Query::new(
            "Contact",
            &["Id", "Email"],
            Predicate::In {
                field: "Email".into(),
                values: vec!["o'brien@x.com".into(), "a@b.com".into()],
            },
        );
        assert_eq!(
            query.to_soql()?,
            "SELECT Id, Email FROM Contact WHERE Email IN ('o\\'brien@x.com', 'a@b.com')"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_like_queries_keep_their_wildcards() -> anyhow::Result<()> {
        let query = Query::new(
            "Opportunity",
            &["Id", "Name"],
            Predicate::Like {
                field: "Name".into(),
                pattern: "%Renewal 2024%".into(),
            },
        );
        assert_eq!(
            query.to_soql()?,
            "SELECT Id, Name FROM Opportunity WHERE Name LIKE '%Renewal 2024%'"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_field_name_tries_to_sneak_in_a_clause() {
        let query = Query::new(
            "Contact",
            &["Id"],
            Predicate::In {
                field: "Email) OR (Name".into(),
                values: vec![],
            },
        );
        assert!(matches!(
            query.to_soql(),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn the_one_where_numbers_count_as_identifiers_but_nulls_do_not() {
        let mut record = Record::new();
        record.insert("Id".into(), serde_json::json!("003A"));
        record.insert("Seq".into(), serde_json::json!(7));
        record.insert("Gone".into(), serde_json::Value::Null);
        assert_eq!(field_as_string(&record, "Id").as_deref(), Some("003A"));
        assert_eq!(field_as_string(&record, "Seq").as_deref(), Some("7"));
        assert_eq!(field_as_string(&record, "Gone"), None);
        assert_eq!(field_as_string(&record, "Missing"), None);
    }
}
