//! 🧱 Payloads: positional rows in, named records out.
//!
//! A [`PayloadShape`] says which field of the remote object comes from which column
//! (or from a fixed literal) and what kind of value it is. [`PayloadBuilder`] applies a
//! shape to a row. No I/O, no surprises: a column that is not there is a typed
//! [`PayloadError`], never an index panic.
//!
//! ```toml
//! [[shapes]]
//! name = "contact"
//! fields = [
//!     { field = "Email", column = 0, kind = "trimmed" },
//!     { field = "LastName", column = 1 },
//!     { field = "Birthdate", column = 4, kind = "date" },
//!     { field = "LeadSource", literal = "SAP" },
//! ]
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::common::{Record, Row};
use crate::error::PayloadError;

/// 🎯 Where a field's value comes from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Column(usize),
    Literal(Value),
}

/// 🏷️ How the raw text is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// as-is
    #[default]
    Text,
    /// surrounding whitespace removed
    Trimmed,
    /// parsed as a JSON integer; empty becomes null
    Integer,
    /// first ten characters (`YYYY-MM-DD` of a timestamp); empty becomes null
    Date,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    #[serde(flatten)]
    pub source: FieldSource,
    #[serde(default)]
    pub kind: ValueKind,
}

/// 📋 A named set of field mappings for one remote object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PayloadShape {
    pub name: String,
    pub fields: Vec<FieldMapping>,
}

/// 🧱 Turns rows into records according to one shape.
#[derive(Debug, Clone, Copy)]
pub struct PayloadBuilder<'a> {
    shape: &'a PayloadShape,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(shape: &'a PayloadShape) -> Self {
        Self { shape }
    }

    /// 🔎 Pick a shape out of a list by name.
    pub fn named(shapes: &'a [PayloadShape], name: &str) -> Result<Self, PayloadError> {
        shapes
            .iter()
            .find(|shape| shape.name == name)
            .map(Self::new)
            .ok_or_else(|| PayloadError::UnknownShape(name.to_string()))
    }

    pub fn build(&self, row: &Row) -> Result<Record, PayloadError> {
        let mut record = Record::new();
        for mapping in &self.shape.fields {
            let value = match &mapping.source {
                FieldSource::Literal(value) => value.clone(),
                FieldSource::Column(index) => {
                    let raw = row.get(*index).ok_or_else(|| PayloadError::IndexOutOfRange {
                        shape: self.shape.name.clone(),
                        field: mapping.field.clone(),
                        index: *index,
                        width: row.len(),
                    })?;
                    self.convert(mapping, raw)?
                }
            };
            record.insert(mapping.field.clone(), value);
        }
        Ok(record)
    }

    fn convert(&self, mapping: &FieldMapping, raw: &str) -> Result<Value, PayloadError> {
        Ok(match mapping.kind {
            ValueKind::Text => Value::String(raw.to_string()),
            ValueKind::Trimmed => Value::String(raw.trim().to_string()),
            ValueKind::Integer => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Value::Null
                } else {
                    let n: i64 = trimmed.parse().map_err(|_| PayloadError::NotAnInteger {
                        shape: self.shape.name.clone(),
                        field: mapping.field.clone(),
                        value: raw.to_string(),
                    })?;
                    Value::from(n)
                }
            }
            ValueKind::Date => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Value::Null
                } else {
                    Value::String(trimmed.chars().take(10).collect())
                }
            }
        })
    }
}
