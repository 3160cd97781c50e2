//! 🧠 InMemoryStore: a record store that lives and dies in RAM.
//!
//! Good enough to run whole pipelines in tests: it assigns Ids, upserts by key field,
//! keeps a recycle bin for soft deletes, counts queries, and can be told to fail a
//! specific write call so the chunk-failure paths get some exercise too. 🦆

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::Record;
use crate::error::StoreError;
use crate::store::{DeleteMode, Predicate, Query, RecordStore, check_identifier, field_as_string};

/// 📒 One write call, as the store saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub kind: &'static str,
    pub object: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<String, Vec<Record>>,
    recycle_bin: BTreeMap<String, Vec<Record>>,
    next_id: u64,
    queries: Vec<Query>,
    writes: Vec<WriteCall>,
    fail_on_write: BTreeSet<usize>,
}

impl StoreState {
    fn mint_id(&mut self) -> String {
        self.next_id += 1;
        format!("MEM{:015}", self.next_id)
    }

    /// 📒 Log the call, then decide whether this is the one we were told to botch.
    fn begin_write(
        &mut self,
        kind: &'static str,
        object: &str,
        records: &[Record],
    ) -> Result<(), StoreError> {
        check_identifier(object)?;
        self.writes.push(WriteCall {
            kind,
            object: object.to_string(),
            records: records.to_vec(),
        });
        let call_no = self.writes.len();
        if self.fail_on_write.contains(&call_no) {
            return Err(StoreError::Refused(format!(
                "injected failure on write call {call_no}"
            )));
        }
        Ok(())
    }
}

/// 🧠 Shared, clonable, RAM-backed [`RecordStore`]. Clones see the same data.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<tokio::sync::Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🌱 Seed existing records. Any record without an `Id` gets one minted.
    pub async fn seed(&self, object: &str, records: impl IntoIterator<Item = Record>) {
        let mut state = self.state.lock().await;
        for mut record in records {
            if field_as_string(&record, "Id").is_none() {
                let id = state.mint_id();
                record.insert("Id".into(), Value::String(id));
            }
            state
                .objects
                .entry(object.to_string())
                .or_default()
                .push(record);
        }
    }

    /// 💣 Make the `call_no`-th write call (1-based, across insert/upsert/delete) fail.
    pub async fn fail_write_call(&self, call_no: usize) {
        self.state.lock().await.fail_on_write.insert(call_no);
    }

    pub async fn records(&self, object: &str) -> Vec<Record> {
        self.state
            .lock()
            .await
            .objects
            .get(object)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn recycle_bin(&self, object: &str) -> Vec<Record> {
        self.state
            .lock()
            .await
            .recycle_bin
            .get(object)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn queries(&self) -> Vec<Query> {
        self.state.lock().await.queries.clone()
    }

    pub async fn writes(&self) -> Vec<WriteCall> {
        self.state.lock().await.writes.clone()
    }
}

/// 🃏 SOQL-style LIKE: `%` is any run, `_` is any one char, case-insensitive.
fn like_matches(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let value: Vec<char> = value.to_lowercase().chars().collect();
    // -- classic two-row DP, reach[j] = pattern[..i] can match value[..j]
    let mut reach = vec![false; value.len() + 1];
    reach[0] = true;
    for p in &pattern {
        let mut next = vec![false; value.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=value.len() {
                    seen |= reach[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=value.len() {
                    next[j] = reach[j - 1];
                }
            }
            literal => {
                for j in 1..=value.len() {
                    next[j] = reach[j - 1] && value[j - 1] == *literal;
                }
            }
        }
        reach = next;
    }
    reach[value.len()]
}

fn matches_predicate(record: &Record, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::In { field, values } => field_as_string(record, field)
            .is_some_and(|actual| values.iter().any(|v| v.eq_ignore_ascii_case(&actual))),
        Predicate::Like { field, pattern } => {
            field_as_string(record, field).is_some_and(|actual| like_matches(pattern, &actual))
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        // -- same validation the remote path gets, so tests catch bad names too
        query.to_soql()?;
        let mut state = self.state.lock().await;
        state.queries.push(query.clone());
        let rows = state
            .objects
            .get(&query.object)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| matches_predicate(record, &query.predicate))
                    .map(|record| {
                        query
                            .fields
                            .iter()
                            .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
                            .collect::<Record>()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, object: &str, records: &[Record]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.begin_write("insert", object, records)?;
        for record in records {
            let mut record = record.clone();
            let id = state.mint_id();
            record.insert("Id".into(), Value::String(id));
            state
                .objects
                .entry(object.to_string())
                .or_default()
                .push(record);
        }
        Ok(records.len())
    }

    async fn upsert(
        &self,
        object: &str,
        key_field: &str,
        records: &[Record],
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.begin_write("upsert", object, records)?;
        check_identifier(key_field)?;

        // -- all-or-nothing: validate the whole chunk before touching anything
        let existing = state.objects.get(object).cloned().unwrap_or_default();
        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            let key = field_as_string(record, key_field).ok_or_else(|| {
                StoreError::Refused(format!("record has no value for key field '{key_field}'"))
            })?;
            let known = existing
                .iter()
                .any(|r| field_as_string(r, key_field).as_deref() == Some(key.as_str()));
            if key_field == "Id" && !known {
                return Err(StoreError::Refused(format!("no {object} with Id '{key}'")));
            }
            keys.push(key);
        }

        for (record, key) in records.iter().zip(keys) {
            let position = state.objects.get(object).and_then(|objs| {
                objs.iter()
                    .position(|r| field_as_string(r, key_field).as_deref() == Some(key.as_str()))
            });
            let mut merged = match position {
                Some(idx) => state.objects.get(object).map(|objs| objs[idx].clone()),
                None => None,
            }
            .unwrap_or_else(|| {
                let mut fresh = Record::new();
                fresh.insert("Id".into(), Value::Null);
                fresh
            });
            for (field, value) in record {
                merged.insert(field.clone(), value.clone());
            }
            if merged.get("Id").is_none_or(Value::is_null) {
                let id = state.mint_id();
                merged.insert("Id".into(), Value::String(id));
            }
            let objs = state.objects.entry(object.to_string()).or_default();
            match position {
                Some(idx) => objs[idx] = merged,
                None => objs.push(merged),
            }
        }
        Ok(records.len())
    }

    async fn delete(
        &self,
        object: &str,
        records: &[Record],
        mode: DeleteMode,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let kind = match mode {
            DeleteMode::Soft => "delete",
            DeleteMode::Hard => "hard_delete",
        };
        state.begin_write(kind, object, records)?;

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = field_as_string(record, "Id")
                .ok_or_else(|| StoreError::Refused("delete record has no Id".into()))?;
            let known = state.objects.get(object).is_some_and(|objs| {
                objs.iter()
                    .any(|r| field_as_string(r, "Id").as_deref() == Some(id.as_str()))
            });
            if !known {
                return Err(StoreError::Refused(format!("no {object} with Id '{id}'")));
            }
            ids.push(id);
        }

        let objs = state.objects.entry(object.to_string()).or_default();
        let (gone, kept): (Vec<Record>, Vec<Record>) = std::mem::take(objs)
            .into_iter()
            .partition(|r| field_as_string(r, "Id").is_some_and(|id| ids.contains(&id)));
        *objs = kept;
        if mode == DeleteMode::Soft {
            state
                .recycle_bin
                .entry(object.to_string())
                .or_default()
                .extend(gone);
        }
        Ok(ids.len())
    }
}
