//! 📦 Common data structures: the building blocks every pass passes around.
//!
//! A [`Row`] is positional: fields are addressed by index, never by name. A
//! [`Record`] is what the remote store eats. In between sits the
//! [`RecordErrorSink`], the little set that remembers which rows we had to leave
//! on the curb so somebody at the helpdesk can go pick them up. 🦆

use std::collections::{BTreeSet, HashMap};

/// 📄 One ordered record of field values from a tabular source.
pub type Row = Vec<String>;

/// 📡 A key-value payload, ready for the remote record store.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// 🔗 Key → remaining fields of the row the key came from. The left-join side of
/// `join_dict_to_csv`.
pub type JoinTable = HashMap<String, Vec<String>>;

/// 🗑️ Identifiers of malformed or rejected rows, collected during one pass.
///
/// It is a set, not a list: the same dirty identifier showing up on five lines is
/// still one phone call. Drained exactly once, at the end of the pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordErrorSink {
    ids: BTreeSet<String>,
}

/// 📨 First line of every dirty-data notification.
pub const DIRTY_DATA_HEADER: &str = "Dirty data - skipped records:";

impl RecordErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// ➕ Remember an identifier. Returns `false` if we already knew about it.
    pub fn record(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// 🚰 Empty the sink, handing back everything it held (sorted, deduplicated).
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ids).into_iter().collect()
    }
}

/// 📨 Render a drained error-row set as a notification body.
///
/// Bare quote characters are what is left of an identifier after a quoted field got
/// split in half. They identify nothing, so they are dropped from the body.
pub fn dirty_data_body(ids: &[String]) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    let mut body = String::from(DIRTY_DATA_HEADER);
    body.push('\n');
    for id in ids.iter().filter(|id| !matches!(id.as_str(), "\"" | "'")) {
        body.push_str(id);
        body.push('\n');
    }
    Some(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_same_dirty_id_only_counts_once() {
        let mut sink = RecordErrorSink::new();
        assert!(sink.record("20000001"));
        assert!(!sink.record("20000001"));
        assert!(sink.record("20000002"));
        assert_eq!(sink.len(), 2);

        let drained = sink.drain();
        assert_eq!(drained, vec!["20000001".to_string(), "20000002".to_string()]);
        assert!(sink.is_empty(), "drain leaves nothing behind");
    }

    #[test]
    fn the_one_where_lonely_quotes_do_not_make_the_email() {
        let ids = vec!["\"".to_string(), "42".to_string(), "'".to_string()];
        let body = dirty_data_body(&ids).expect("non-empty ids produce a body");
        assert_eq!(body, "Dirty data - skipped records:\n42\n");
    }

    #[test]
    fn the_one_where_no_dirt_means_no_mail() {
        assert_eq!(dirty_data_body(&[]), None);
    }
}
