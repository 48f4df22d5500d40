//! Annotation data access.
//!
//! Annotation files are plain JSON with no fixed schema. They are read
//! either as a raw [`serde_json::Value`] or as an [`AnnotationTable`]:
//! ordered columns over ordered, flat rows. Prediction columns are appended
//! to the table in memory and written back with [`table_to_records`].

use crate::error::{Result, VqaError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// One flat annotation row, keys in column order.
pub type AnnotationRecord = Map<String, Value>;

/// Indentation used for every JSON file we write.
const JSON_INDENT: &[u8] = b"    ";

/// Column-ordered, row-major table of annotation records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTable {
    columns: Vec<String>,
    rows: Vec<AnnotationRecord>,
}

impl AnnotationTable {
    /// Build a table from records. The column set is the union of all keys
    /// in first-seen order; cells a record lacks are `null`.
    pub fn from_records(records: Vec<AnnotationRecord>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|c| (c.clone(), record.remove(c).unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Interpret a parsed JSON document as a table.
    ///
    /// Accepts an array of objects (one row each), an object of equal-length
    /// arrays (column-oriented) or an object of `{index: value}` objects
    /// (column-oriented, keyed by row index).
    pub fn from_value(path: &Path, value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    match item {
                        Value::Object(record) => records.push(record),
                        other => {
                            return Err(VqaError::format(
                                path,
                                format!("row {} is a {}, expected an object", i, kind(&other)),
                            ));
                        }
                    }
                }
                Ok(Self::from_records(records))
            }
            Value::Object(columns) => Self::from_columns(path, columns),
            other => Err(VqaError::format(
                path,
                format!("top-level {} cannot be read as a table", kind(&other)),
            )),
        }
    }

    fn from_columns(path: &Path, columns: Map<String, Value>) -> Result<Self> {
        if columns.is_empty() {
            return Ok(Self::default());
        }

        if columns.values().all(Value::is_array) {
            let names: Vec<String> = columns.keys().cloned().collect();
            let cells: Vec<Vec<Value>> = columns
                .into_iter()
                .map(|(_, v)| match v {
                    Value::Array(a) => a,
                    _ => Vec::new(),
                })
                .collect();

            let len = cells[0].len();
            if let Some(pos) = cells.iter().position(|c| c.len() != len) {
                return Err(VqaError::format(
                    path,
                    format!(
                        "column '{}' has {} values, expected {}",
                        names[pos],
                        cells[pos].len(),
                        len
                    ),
                ));
            }

            let mut iters: Vec<_> = cells.into_iter().map(Vec::into_iter).collect();
            let rows = (0..len)
                .map(|_| {
                    names
                        .iter()
                        .zip(iters.iter_mut())
                        .map(|(name, it)| (name.clone(), it.next().unwrap_or(Value::Null)))
                        .collect()
                })
                .collect();

            return Ok(Self {
                columns: names,
                rows,
            });
        }

        if columns.values().all(Value::is_object) {
            let mut index: Vec<String> = Vec::new();
            for column in columns.values() {
                if let Value::Object(cells) = column {
                    for key in cells.keys() {
                        if !index.contains(key) {
                            index.push(key.clone());
                        }
                    }
                }
            }

            let names: Vec<String> = columns.keys().cloned().collect();
            let rows = index
                .iter()
                .map(|idx| {
                    columns
                        .iter()
                        .map(|(name, column)| {
                            let cell = column.get(idx).cloned().unwrap_or(Value::Null);
                            (name.clone(), cell)
                        })
                        .collect()
                })
                .collect();

            return Ok(Self {
                columns: names,
                rows,
            });
        }

        Err(VqaError::format(
            path,
            "top-level object must map every column to an array or to an object",
        ))
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[AnnotationRecord] {
        &self.rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// All cells of one column.
    pub fn column(&self, name: &str) -> Result<Vec<&Value>> {
        if !self.has_column(name) {
            return Err(VqaError::invalid(format!(
                "unknown column '{}' (available: {})",
                name,
                self.columns.join(", ")
            )));
        }
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(name).unwrap_or(&Value::Null))
            .collect())
    }

    /// One column rendered as strings; `null` becomes the empty string.
    pub fn string_column(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.column(name)?.into_iter().map(value_to_string).collect())
    }

    /// Append a column, or replace it if it already exists.
    pub fn push_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(VqaError::invalid(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }

        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// First `n` rows (for quick runs).
    pub fn take(&self, n: usize) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Row-major records, one flat object per row.
    pub fn to_records(&self) -> Vec<AnnotationRecord> {
        self.rows.clone()
    }
}

/// Render a cell as plain text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Load any JSON document.
pub fn load_structured(path: &Path) -> Result<Value> {
    let data = fs::read(path).map_err(|e| VqaError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| VqaError::format(path, e.to_string()))
}

/// Load an annotation file as a table.
pub fn load_annotations_as_table(path: &Path) -> Result<AnnotationTable> {
    let value = load_structured(path)?;
    let table = AnnotationTable::from_value(path, value)?;
    log::debug!(
        "Loaded {} rows x {} columns from {}",
        table.len(),
        table.columns().len(),
        path.display()
    );
    Ok(table)
}

/// Save any serializable value as JSON with 4-space indentation,
/// overwriting an existing file.
pub fn save_structured<T: Serialize + ?Sized>(data: &T, path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| VqaError::io(parent, e))?;
        }
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(JSON_INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    data.serialize(&mut serializer)
        .map_err(|e| VqaError::format(path, e.to_string()))?;

    fs::write(path, &buf).map_err(|e| VqaError::io(path, e))?;
    log::info!("Data saved to {}", path.display());
    Ok(())
}

/// Write a table as an array of flat records.
pub fn table_to_records(table: &AnnotationTable, path: &Path) -> Result<()> {
    save_structured(&table.to_records(), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_table() -> AnnotationTable {
        let value = json!([
            {"image": "img/001.jpg", "caption": "A ship at sea.", "solution": "B"},
            {"image": "img/002.jpg", "caption": "Two dancers.", "solution": "D"},
            {"image": "img/003.jpg", "caption": "A bowl of fruit.", "solution": "A"}
        ]);
        AnnotationTable::from_value(Path::new("mem.json"), value).unwrap()
    }

    #[test]
    fn test_records_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("annotations.json");

        let mut table = sample_table();
        table
            .push_column("pred_easy", vec![json!("B"), json!("A"), json!("A")])
            .unwrap();

        table_to_records(&table, &path).unwrap();
        let loaded = load_annotations_as_table(&path).unwrap();

        assert_eq!(loaded, table);
        assert_eq!(
            loaded.columns(),
            &["image", "caption", "solution", "pred_easy"]
        );
    }

    #[test]
    fn test_save_uses_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");

        save_structured(&json!({"a": [1]}), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\n    \"a\": [\n        1\n    ]\n}");
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");

        save_structured(&json!({"old": true}), &path).unwrap();
        save_structured(&json!({"new": true}), &path).unwrap();
        assert_eq!(load_structured(&path).unwrap(), json!({"new": true}));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_structured(Path::new("/nonexistent/annotations.json")).unwrap_err();
        assert!(matches!(err, VqaError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_json_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"caption\": ").unwrap();

        let err = load_structured(&path).unwrap_err();
        assert!(matches!(err, VqaError::Format { .. }));
    }

    #[test]
    fn test_column_oriented_arrays() {
        let value = json!({"caption": ["a", "b"], "solution": ["A", "C"]});
        let table = AnnotationTable::from_value(Path::new("m.json"), value).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.string_column("solution").unwrap(), vec!["A", "C"]);
    }

    #[test]
    fn test_column_oriented_index_maps() {
        let value = json!({
            "caption": {"0": "a", "1": "b"},
            "solution": {"0": "A", "1": "C"}
        });
        let table = AnnotationTable::from_value(Path::new("m.json"), value).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1]["caption"], json!("b"));
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let value = json!({"caption": ["a", "b"], "solution": ["A"]});
        let err = AnnotationTable::from_value(Path::new("m.json"), value).unwrap_err();
        assert!(matches!(err, VqaError::Format { .. }));
    }

    #[test]
    fn test_scalar_top_level_rejected() {
        let err = AnnotationTable::from_value(Path::new("m.json"), json!(42)).unwrap_err();
        assert!(matches!(err, VqaError::Format { .. }));
    }

    #[test]
    fn test_missing_keys_become_null() {
        let value = json!([{"a": 1}, {"b": 2}]);
        let table = AnnotationTable::from_value(Path::new("m.json"), value).unwrap();

        assert_eq!(table.columns(), &["a", "b"]);
        assert_eq!(table.rows()[0]["b"], Value::Null);
        assert_eq!(table.string_column("b").unwrap(), vec!["", "2"]);
    }

    #[test]
    fn test_unknown_column() {
        let table = sample_table();
        assert!(matches!(
            table.column("prediction"),
            Err(VqaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_push_column_length_mismatch() {
        let mut table = sample_table();
        let err = table.push_column("pred", vec![json!("A")]).unwrap_err();
        assert!(matches!(err, VqaError::InvalidArgument(_)));
        assert!(!table.has_column("pred"));
    }

    #[test]
    fn test_take() {
        let table = sample_table();
        assert_eq!(table.take(2).len(), 2);
        assert_eq!(table.take(10).len(), 3);
    }
}
