//! 🔗 Joins: enrich a row from a mapping or table built by an earlier step.

use crate::common::{JoinTable, Row};
use crate::error::RowFault;
use crate::lookup::KeyMapping;
use crate::transforms::{Verdict, field};

/// 🆔 Append the mapped identifier of the first field (case-insensitive) that the
/// mapping knows about, or an empty field when none of them are known.
///
/// Linear in row width. Rows are narrow, mappings are big.
pub fn tack_sfid(row: &mut Row, mapping: &KeyMapping) -> Result<Verdict, RowFault> {
    let found = row
        .iter()
        .find_map(|f| mapping.get_ci(f))
        .unwrap_or_default()
        .to_string();
    row.push(found);
    Ok(Verdict::Keep)
}

/// 🤝 Left join: append `table[row[match_col]][col]`, or drop the row (no error row)
/// when the key is absent.
pub fn join_dict_to_csv(
    row: &mut Row,
    table: &JoinTable,
    match_col: usize,
    col: usize,
) -> Result<Verdict, RowFault> {
    let key = field(row, match_col)?;
    let Some(joined) = table.get(key) else {
        return Ok(Verdict::Drop);
    };
    let value = field(joined, col)?.to_string();
    row.push(value);
    Ok(Verdict::Keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Direction;

    fn row(fields: &[&str]) -> Row {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn the_one_where_shouty_emails_still_find_their_id() -> anyhow::Result<()> {
        let mut mapping = KeyMapping::new(Direction::KeyToId, true);
        mapping.insert("x@y.com", "ID1");

        let mut r = row(&["Smith", "X@Y.COM"]);
        tack_sfid(&mut r, &mapping)?;
        assert_eq!(r, row(&["Smith", "X@Y.COM", "ID1"]));

        let mut stranger = row(&["Nobody", "n@o.pe"]);
        tack_sfid(&mut stranger, &mapping)?;
        assert_eq!(stranger, row(&["Nobody", "n@o.pe", ""]));
        Ok(())
    }

    #[test]
    fn the_one_where_an_unfolded_mapping_still_ignores_case() -> anyhow::Result<()> {
        let mut mapping = KeyMapping::new(Direction::KeyToId, false);
        mapping.insert("FY24 Renewal", "006A");

        let mut r = row(&["fy24 renewal"]);
        tack_sfid(&mut r, &mapping)?;
        assert_eq!(r, row(&["fy24 renewal", "006A"]));

        let mut exact = row(&["FY24 Renewal"]);
        tack_sfid(&mut exact, &mapping)?;
        assert_eq!(exact, row(&["FY24 Renewal", "006A"]));
        assert_eq!(mapping.get("fy24 renewal"), None, "plain get stays exact");
        Ok(())
    }

    #[test]
    fn the_one_where_the_left_join_leaves_strangers_behind() -> anyhow::Result<()> {
        let mut table = JoinTable::new();
        table.insert("V1".into(), row(&["Venue One", "NSW"]));

        let mut known = row(&["M1", "V1"]);
        assert_eq!(join_dict_to_csv(&mut known, &table, 1, 1)?, Verdict::Keep);
        assert_eq!(known, row(&["M1", "V1", "NSW"]));

        let mut unknown = row(&["M2", "V9"]);
        assert_eq!(join_dict_to_csv(&mut unknown, &table, 1, 1)?, Verdict::Drop);

        let mut narrow = row(&["M3", "V1"]);
        assert!(join_dict_to_csv(&mut narrow, &table, 1, 5).is_err());
        Ok(())
    }
}
