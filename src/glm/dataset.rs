//! In-memory rectangular dataset.
//!
//! The core only needs read access to named columns; loading files and
//! initial type casting belong to the surrounding platform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// A single column of data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// Numeric column.
    Float(Vec<f64>),
    /// Categorical column.
    Text(Vec<String>),
}

impl Column {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    /// Whether the column is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A rectangular dataset addressable by column name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    columns: BTreeMap<String, Column>,
    rows: usize,
}

impl Dataset {
    /// Build a dataset from named columns. All columns must have the same
    /// number of rows.
    pub fn from_columns(columns: Vec<(String, Column)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        let mut rows = None;
        for (name, column) in columns {
            match rows {
                None => rows = Some(column.len()),
                Some(n) if n != column.len() => {
                    return Err(Error::Configuration(format!(
                        "column {name} has {} rows, expected {n}",
                        column.len()
                    )));
                }
                Some(_) => {}
            }
            map.insert(name, column);
        }
        Ok(Self {
            columns: map,
            rows: rows.unwrap_or(0),
        })
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Numeric values of a column; a text column is an error here.
    pub fn float_column(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Float(v) => Ok(v),
            Column::Text(_) => Err(Error::Configuration(format!(
                "column {name} is categorical, expected numeric"
            ))),
        }
    }

    /// Coerce the named columns to text, mirroring the platform's
    /// cast-to-string option for numerically coded categoricals.
    pub fn cast_to_string(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let column = self
                .columns
                .get_mut(name)
                .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
            if let Column::Float(values) = column {
                let text = values.iter().map(|v| format!("{v}")).collect();
                *column = Column::Text(text);
            }
        }
        Ok(())
    }
}
