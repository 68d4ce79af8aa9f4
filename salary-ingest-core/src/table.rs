//! In-memory tabular model shared by the reader, the salary filter and the
//! artifact writer.
//!
//! A [`Table`] is columnar: an ordered list of uniquely named [`Column`]s of
//! equal length. Every cell is a [`Value`], a tagged scalar whose type is
//! inferred when the file is loaded.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single cell.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Str(String),
}

impl Value {
    /// Builds a float cell, mapping NaN to `Null` so that every `Float` is
    /// comparable with itself.
    pub fn float(f: f64) -> Self {
        if f.is_nan() {
            Value::Null
        } else {
            Value::Float(f)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Numeric view of the cell. Strings are parsed after trimming; anything
    /// that is not a number yields `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
            _ => None,
        }
    }

    /// Coerces the cell to a number, mapping failures to `Null`.
    pub fn to_numeric(&self) -> Value {
        match self {
            Value::Int(_) | Value::Float(_) => self.clone(),
            Value::Str(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Value::Int(i)
                } else {
                    s.parse::<f64>().map(Value::float).unwrap_or(Value::Null)
                }
            }
            _ => Value::Null,
        }
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Date(_) => "date",
            Value::Str(_) => "string",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Date(d) => d.hash(state),
            Value::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            // Debug keeps the decimal point on integral floats ("120000.0").
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Dominant type of the column's non-null cells, for diagnostics.
    pub fn type_label(&self) -> &'static str {
        let mut label = "null";
        for v in self.values.iter().filter(|v| !v.is_null()) {
            if label == "null" {
                label = v.type_name();
            } else if label != v.type_name() {
                return "mixed";
            }
        }
        label
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TableError {
    #[error("column '{name}' has {actual} values, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Builds a table, making duplicate column names unique with a `.N`
    /// suffix and rejecting columns of unequal length.
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let expected = columns.first().map(|c| c.values.len()).unwrap_or(0);
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(columns.len());
        for mut col in columns {
            if col.values.len() != expected {
                return Err(TableError::LengthMismatch {
                    name: col.name,
                    expected,
                    actual: col.values.len(),
                });
            }
            if seen.contains(&col.name) {
                let base = col.name.clone();
                let mut n = 1;
                while seen.contains(&format!("{base}.{n}")) {
                    n += 1;
                }
                col.name = format!("{base}.{n}");
            }
            seen.insert(col.name.clone());
            out.push(col);
        }
        Ok(Self { columns: out })
    }

    /// Builds a table from a header and row-major cells. Short rows must
    /// already be padded by the caller.
    pub fn from_rows(header: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        let mut columns: Vec<Column> = header
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect();
        for row in rows {
            for (col, value) in columns.iter_mut().zip(row) {
                col.values.push(value);
            }
        }
        Self::new(columns)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Row `idx` as owned cells in column order.
    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.values[idx].clone()).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows()).map(move |i| self.row(i))
    }

    /// Keeps the rows whose mask entry is `true`.
    pub fn retain_rows(&mut self, mask: &[bool]) {
        for col in &mut self.columns {
            let mut keep = mask.iter();
            col.values.retain(|_| keep.next().copied().unwrap_or(false));
        }
    }

    /// Removes exact duplicate rows, keeping the first occurrence. Returns the
    /// number of rows removed.
    pub fn drop_duplicates(&mut self) -> usize {
        let mut seen: HashSet<Vec<Value>> = HashSet::with_capacity(self.num_rows());
        let mask: Vec<bool> = self.rows().map(|row| seen.insert(row)).collect();
        let removed = mask.iter().filter(|keep| !**keep).count();
        if removed > 0 {
            self.retain_rows(&mask);
        }
        removed
    }

    /// Replaces every cell of the named column with `f(cell)`.
    pub fn map_column<F>(&mut self, name: &str, f: F) -> bool
    where
        F: Fn(&Value) -> Value,
    {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => {
                col.values = col.values.iter().map(f).collect();
                true
            }
            None => false,
        }
    }
}

/// Infers one column's cell types from raw text: integer if every non-empty
/// cell is an `i64`, else float, else date, else boolean, else string.
/// Empty cells become `Null`.
pub fn infer_column(raw: Vec<Option<String>>) -> Vec<Value> {
    let present = || raw.iter().flatten().map(|s| s.trim());

    if present().all(|s| s.parse::<i64>().is_ok()) {
        return convert(raw, |s| s.trim().parse::<i64>().ok().map(Value::Int));
    }
    if present().all(|s| s.parse::<f64>().is_ok()) {
        return convert(raw, |s| s.trim().parse::<f64>().ok().map(Value::float));
    }
    if present().all(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).is_ok()) {
        return convert(raw, |s| {
            NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .ok()
                .map(Value::Date)
        });
    }
    if present().all(|s| s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")) {
        return convert(raw, |s| Some(Value::Bool(s.trim().eq_ignore_ascii_case("true"))));
    }
    raw.into_iter()
        .map(|cell| cell.map(Value::Str).unwrap_or(Value::Null))
        .collect()
}

fn convert<F>(raw: Vec<Option<String>>, parse: F) -> Vec<Value>
where
    F: Fn(&str) -> Option<Value>,
{
    raw.into_iter()
        .map(|cell| cell.and_then(|s| parse(&s)).unwrap_or(Value::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::Str("A".into())],
                vec![Value::Int(2), Value::Str("B".into())],
                vec![Value::Int(1), Value::Str("A".into())],
            ],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_column_names_get_suffixes() {
        let t = Table::new(vec![
            Column::new("a", vec![Value::Int(1)]),
            Column::new("a", vec![Value::Int(2)]),
            Column::new("a", vec![Value::Int(3)]),
        ])
        .unwrap();
        assert_eq!(t.column_names(), vec!["a", "a.1", "a.2"]);
    }

    #[test]
    fn unequal_columns_are_rejected() {
        let err = Table::new(vec![
            Column::new("a", vec![Value::Int(1)]),
            Column::new("b", vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { .. }));
    }

    #[test]
    fn drop_duplicates_keeps_first_occurrence() {
        let mut t = sample();
        assert_eq!(t.drop_duplicates(), 1);
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.row(1), vec![Value::Int(2), Value::Str("B".into())]);
    }

    #[test]
    fn inference_prefers_narrowest_type() {
        let ints = infer_column(vec![Some("1".into()), None, Some(" 3 ".into())]);
        assert_eq!(ints, vec![Value::Int(1), Value::Null, Value::Int(3)]);

        let floats = infer_column(vec![Some("1".into()), Some("2.5".into())]);
        assert_eq!(floats, vec![Value::Float(1.0), Value::Float(2.5)]);

        let dates = infer_column(vec![Some("2023-01-15".into())]);
        assert!(matches!(dates[0], Value::Date(_)));

        let mixed = infer_column(vec![Some("1".into()), Some("x".into())]);
        assert_eq!(mixed[0], Value::Str("1".into()));
    }

    #[test]
    fn floats_render_with_decimal_point() {
        assert_eq!(Value::Float(120000.0).to_string(), "120000.0");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn numeric_coercion_maps_garbage_to_null() {
        assert_eq!(Value::Str("60000".into()).to_numeric(), Value::Int(60000));
        assert_eq!(Value::Str("6.5".into()).to_numeric(), Value::Float(6.5));
        assert_eq!(Value::Str("n/a".into()).to_numeric(), Value::Null);
        assert_eq!(Value::Bool(true).to_numeric(), Value::Null);
    }
}
