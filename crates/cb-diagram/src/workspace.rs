//! Named matrix variables consumed by state-space blocks.
//!
//! The block diagram never evaluates scripts itself; it asks a
//! [`VariableResolver`] for matrices by name when a simulation starts.

use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::DMatrix;

use crate::persist::{PersistError, PersistResult};

/// Lookup of named matrices (the script workspace seam).
pub trait VariableResolver {
    /// Return the matrix bound to `name`, if any.
    fn resolve(&self, name: &str) -> Option<DMatrix<f64>>;
}

/// Resolver with no variables at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariables;

impl VariableResolver for NoVariables {
    fn resolve(&self, _name: &str) -> Option<DMatrix<f64>> {
        None
    }
}

/// In-memory store of named matrices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workspace {
    vars: BTreeMap<String, DMatrix<f64>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: DMatrix<f64>) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&DMatrix<f64>> {
        self.vars.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<DMatrix<f64>> {
        self.vars.remove(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Parse a TOML document of matrices.
    ///
    /// ```toml
    /// A = [[0.0, 1.0], [-2.0, -3.0]]   # rows
    /// B = [0.0, 1.0]                   # column vector
    /// D = 0.0                          # 1x1
    /// ```
    pub fn from_toml_str(text: &str) -> PersistResult<Self> {
        let table: toml::Table = text.parse()?;
        let mut ws = Self::new();
        for (name, value) in &table {
            ws.insert(name.clone(), matrix_from_value(name, value)?);
        }
        Ok(ws)
    }

    pub fn load(path: &Path) -> PersistResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

impl VariableResolver for Workspace {
    fn resolve(&self, name: &str) -> Option<DMatrix<f64>> {
        self.vars.get(name).cloned()
    }
}

fn number(name: &str, value: &toml::Value) -> PersistResult<f64> {
    match value {
        toml::Value::Float(v) => Ok(*v),
        toml::Value::Integer(v) => Ok(*v as f64),
        other => Err(PersistError::Format {
            what: format!("variable '{name}' contains non-numeric entry {other}"),
        }),
    }
}

fn matrix_from_value(name: &str, value: &toml::Value) -> PersistResult<DMatrix<f64>> {
    let rows = match value {
        toml::Value::Array(rows) => rows,
        scalar => return Ok(DMatrix::from_element(1, 1, number(name, scalar)?)),
    };

    if !rows.iter().all(|r| r.is_array()) {
        let column = rows
            .iter()
            .map(|v| number(name, v))
            .collect::<PersistResult<Vec<f64>>>()?;
        return Ok(DMatrix::from_column_slice(column.len(), 1, &column));
    }

    let mut data = Vec::new();
    let mut ncols = None;
    for row in rows.iter().filter_map(toml::Value::as_array) {
        if *ncols.get_or_insert(row.len()) != row.len() {
            return Err(PersistError::Format {
                what: format!("variable '{name}' has rows of different lengths"),
            });
        }
        for v in row {
            data.push(number(name, v)?);
        }
    }
    Ok(DMatrix::from_row_slice(rows.len(), ncols.unwrap_or(0), &data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_columns_and_scalars() {
        let ws = Workspace::from_toml_str(
            r#"
A = [[0.0, 1.0], [-2, -3.0]]
B = [0.0, 1.0]
D = 0
"#,
        )
        .unwrap();
        let a = ws.resolve("A").unwrap();
        assert_eq!(a.shape(), (2, 2));
        assert_eq!(a[(1, 0)], -2.0);
        assert_eq!(ws.resolve("B").unwrap().shape(), (2, 1));
        assert_eq!(ws.resolve("D").unwrap().shape(), (1, 1));
        assert!(ws.resolve("C").is_none());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Workspace::from_toml_str("A = [[1.0, 2.0], [3.0]]").unwrap_err();
        assert!(err.to_string().contains("different lengths"));
    }

    #[test]
    fn strings_are_rejected() {
        assert!(Workspace::from_toml_str("A = \"eye(2)\"").is_err());
    }
}
