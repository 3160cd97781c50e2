//! 🪞 De-duplication, the one operation with a finalize step.
//!
//! Rows are absorbed into a keyed map while streaming. A later row with the same key
//! overwrites the earlier one, but the key keeps its first-seen position, so output
//! order is "order of first appearance, contents of last appearance". 🦆

use std::collections::HashMap;

use crate::common::{JoinTable, Row};
use crate::error::RowFault;
use crate::transforms::{Verdict, field};

/// 🗃️ Keyed row store: last write wins, first-seen order kept.
#[derive(Debug, Default)]
pub struct Deduplicator {
    index: HashMap<String, usize>,
    rows: Vec<Row>,
}

impl Deduplicator {
    /// 🧲 Take the row out of the stream and file it under `row[col]`.
    pub fn absorb(&mut self, row: &mut Row, col: usize) -> Result<Verdict, RowFault> {
        let key = field(row, col)?.to_string();
        let row = std::mem::take(row);
        match self.index.get(&key) {
            Some(&slot) => self.rows[slot] = row,
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push(row);
            }
        }
        Ok(Verdict::Absorbed)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Row> {
        self.index.get(key).map(|&slot| &self.rows[slot])
    }

    /// 🏁 Drain everything kept, in first-seen key order.
    pub fn finish(self) -> Vec<Row> {
        self.rows
    }
}

/// 📚 In-memory rows → join table keyed on `key_col` (key removed from the value).
/// Rows without that column are skipped. Last row wins.
pub fn dictify(rows: impl IntoIterator<Item = Row>, key_col: usize) -> JoinTable {
    rows.into_iter()
        .filter(|row| key_col < row.len())
        .map(|mut row| {
            let key = row.remove(key_col);
            (key, row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Row {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn the_one_where_a_beats_a() -> anyhow::Result<()> {
        let mut dedupe = Deduplicator::default();
        for mut r in [row(&["a", "1"]), row(&["a", "2"]), row(&["b", "3"])] {
            assert_eq!(dedupe.absorb(&mut r, 0)?, Verdict::Absorbed);
            assert!(r.is_empty(), "the row moved into the deduplicator");
        }

        assert_eq!(dedupe.len(), 2);
        assert_eq!(dedupe.get("a"), Some(&row(&["a", "2"])));
        assert_eq!(dedupe.get("b"), Some(&row(&["b", "3"])));
        assert_eq!(dedupe.finish(), vec![row(&["a", "2"]), row(&["b", "3"])]);
        Ok(())
    }

    #[test]
    fn the_one_where_a_keyless_row_is_left_in_place() {
        let mut dedupe = Deduplicator::default();
        let mut r = row(&["only"]);
        assert!(dedupe.absorb(&mut r, 3).is_err());
        assert_eq!(r, row(&["only"]));
        assert!(dedupe.is_empty());
    }

    #[test]
    fn the_one_where_rows_become_a_dictionary() {
        let table = dictify(
            vec![row(&["k1", "a", "b"]), row(&["x"]), row(&["k1", "c", "d"])],
            0,
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("k1"), Some(&row(&["c", "d"])));
        assert_eq!(table.get("x"), Some(&Vec::new()));
    }
}
