//! 🔍 Lookup: turn business keys into remote identifiers, a sub-batch at a time.
//!
//! 🧠 Knowledge graph:
//! - [`KeyMapping`]: the merged answer. Remembers which side is the identifier so it
//!   can become delete payloads later without anyone guessing.
//! - [`LookupResolver`]: drains a key collection in sub-batches of at most
//!   `max_keys_per_query`, one `IN (...)` query each. Any failed sub-batch fails the
//!   whole call; a half-resolved mapping is worse than none.
//! - [`LookupResolver::resolve_like`]: single `LIKE` query, for the objects whose
//!   natural key is buried inside a longer name.
//!
//! Blank keys are skipped, duplicate keys are asked about once. Queries run one after
//! the other, never in parallel. 🐢

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::common::Record;
use crate::error::PipelineError;
use crate::store::{Predicate, Query, RecordStore, field_as_string};

/// ↔️ Which side of a [`KeyMapping`] holds the remote identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// business key → identifier
    #[default]
    KeyToId,
    /// identifier → business key
    IdToKey,
}

/// 🗺️ Business key ↔ remote identifier.
///
/// With `fold_case`, keys are lowercased on insert and on lookup. Identifiers are never
/// folded: `003A` and `003a` are different records. Without it, a lowercased side index
/// still answers [`KeyMapping::get_ci`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMapping {
    entries: HashMap<String, String>,
    // -- lowercased key → value, only kept when keys are not already folded
    lowered: HashMap<String, String>,
    fold_case: bool,
    direction: Direction,
}

impl KeyMapping {
    pub fn new(direction: Direction, fold_case: bool) -> Self {
        Self {
            entries: HashMap::new(),
            lowered: HashMap::new(),
            // -- identifiers are the keys in IdToKey, and identifiers never fold
            fold_case: fold_case && direction == Direction::KeyToId,
            direction,
        }
    }

    fn fold(&self, key: &str) -> String {
        if self.fold_case {
            key.to_lowercase()
        } else {
            key.to_string()
        }
    }

    /// ➕ Insert, last write wins. Returns the value that got replaced, if any.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
        let value = value.into();
        if !self.fold_case {
            self.lowered.insert(key.to_lowercase(), value.clone());
        }
        self.entries.insert(self.fold(key), value)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&self.fold(key)).map(String::as_str)
    }

    /// 🔡 Case-insensitive lookup, whether or not the mapping folds its keys. An exact
    /// match wins over a case-insensitive one.
    pub fn get_ci(&self, key: &str) -> Option<&str> {
        let lower = key.to_lowercase();
        let found = if self.fold_case {
            self.entries.get(&lower)
        } else {
            self.entries.get(key).or_else(|| self.lowered.get(&lower))
        };
        found.map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 🆔 Every remote identifier in the mapping, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = match self.direction {
            Direction::KeyToId => self.entries.values().map(String::as_str).collect(),
            Direction::IdToKey => self.entries.keys().map(String::as_str).collect(),
        };
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// 🗑️ `[{"Id": ...}, ...]`, ready for the delete path.
    pub fn to_delete_records(&self) -> Vec<Record> {
        self.identifiers()
            .into_iter()
            .map(|id| {
                let mut record = Record::new();
                record.insert("Id".into(), Value::String(id.to_string()));
                record
            })
            .collect()
    }
}

/// 🧾 What to ask the store, and how to shape the answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub object: String,
    pub key_field: String,
    pub id_field: String,
    pub reverse: bool,
    pub fold_case: bool,
    pub max_keys_per_query: usize,
}

impl LookupRequest {
    pub fn new(object: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            key_field: key_field.into(),
            id_field: "Id".into(),
            reverse: false,
            fold_case: false,
            max_keys_per_query: 200,
        }
    }

    fn direction(&self) -> Direction {
        if self.reverse {
            Direction::IdToKey
        } else {
            Direction::KeyToId
        }
    }
}

/// 📊 The mapping plus how many round trips it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub mapping: KeyMapping,
    pub queries: usize,
}

/// 🔍 Resolves business keys against a [`RecordStore`].
#[derive(Debug)]
pub struct LookupResolver<'s, S: RecordStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: RecordStore + ?Sized> LookupResolver<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// 🚰 Drain `keys` into sub-batched `IN` queries and merge the answers.
    ///
    /// `keys` is empty afterwards whether or not the call succeeded.
    pub async fn resolve(
        &self,
        request: &LookupRequest,
        keys: &mut Vec<String>,
    ) -> Result<Resolution, PipelineError> {
        let max = request.max_keys_per_query.max(1);
        let mut seen = HashSet::new();
        // -- a deque, so taking each sub-batch off the front does not shift the rest
        let mut pending: VecDeque<String> = keys
            .drain(..)
            .filter(|key| !key.trim().is_empty())
            .filter(|key| {
                let seen_as = if request.fold_case {
                    key.to_lowercase()
                } else {
                    key.clone()
                };
                seen.insert(seen_as)
            })
            .collect();

        let batches = pending.len().div_ceil(max);
        let mut mapping = KeyMapping::new(request.direction(), request.fold_case);
        let mut batch = 0;
        info!(
            "🔍 Resolving {} keys against {}.{} in {batches} sub-batches",
            pending.len(),
            request.object,
            request.key_field
        );

        while !pending.is_empty() {
            let take = pending.len().min(max);
            let values: Vec<String> = pending.drain(..take).collect();
            batch += 1;
            let query = Query::new(
                &request.object,
                &[request.id_field.as_str(), request.key_field.as_str()],
                Predicate::In {
                    field: request.key_field.clone(),
                    values,
                },
            );
            let records = self.store.query(&query).await.map_err(|source| {
                PipelineError::LookupFailure {
                    object: request.object.clone(),
                    batch,
                    batches,
                    source,
                }
            })?;
            debug!("🔍 sub-batch {batch}/{batches}: {} records", records.len());
            merge(&mut mapping, request, &records);
        }

        Ok(Resolution {
            mapping,
            queries: batch,
        })
    }

    /// 🃏 One `LIKE` query. `pattern` keeps whatever `%`/`_` wildcards it came with.
    pub async fn resolve_like(
        &self,
        request: &LookupRequest,
        pattern: &str,
    ) -> Result<Resolution, PipelineError> {
        let query = Query::new(
            &request.object,
            &[request.id_field.as_str(), request.key_field.as_str()],
            Predicate::Like {
                field: request.key_field.clone(),
                pattern: pattern.to_string(),
            },
        );
        let records =
            self.store
                .query(&query)
                .await
                .map_err(|source| PipelineError::LookupFailure {
                    object: request.object.clone(),
                    batch: 1,
                    batches: 1,
                    source,
                })?;
        let mut mapping = KeyMapping::new(request.direction(), request.fold_case);
        merge(&mut mapping, request, &records);
        Ok(Resolution {
            mapping,
            queries: 1,
        })
    }
}

fn merge(mapping: &mut KeyMapping, request: &LookupRequest, records: &[Record]) {
    for record in records {
        let key = field_as_string(record, &request.key_field);
        let id = field_as_string(record, &request.id_field);
        match (key, id) {
            (Some(key), Some(id)) if request.reverse => {
                mapping.insert(&id, key);
            }
            (Some(key), Some(id)) => {
                mapping.insert(&key, id);
            }
            _ => warn!(
                "⚠️ {} record without a usable {} / {} pair, skipping",
                request.object, request.key_field, request.id_field
            ),
        }
    }
}
