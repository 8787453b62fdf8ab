use super::{DatasetError, read_err};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

/// Parses a JSON array of records, newline-delimited records, or a
/// column-oriented object (`{"col": [..]}` or `{"col": {"row": v}}`)
pub(super) fn read_json(path: &Path) -> Result<(DataFrame, Vec<String>), DatasetError> {
    let bytes = std::fs::read(path).map_err(read_err)?;

    let frame = match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => read_with(bytes, JsonFormat::Json)?,
        Some(b'{') => match column_layout(&bytes) {
            Some(columns) => read_columns(columns)?,
            None => read_with(bytes, JsonFormat::JsonLines)?,
        },
        Some(_) => {
            return Err(DatasetError::Read(
                "expected JSON records or an object of columns".to_string(),
            ));
        }
        None => return Err(DatasetError::Read("file is empty".to_string())),
    };

    let header = frame
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    Ok((frame, header))
}

fn read_with(bytes: Vec<u8>, format: JsonFormat) -> Result<DataFrame, DatasetError> {
    JsonReader::new(Cursor::new(bytes))
        .with_json_format(format)
        .finish()
        .map_err(read_err)
}

/// A single top-level object whose members are all arrays or objects.
/// Anything else starting with `{` is read as JSON lines.
fn column_layout(bytes: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes).ok()? {
        Value::Object(columns)
            if !columns.is_empty()
                && columns.values().all(|v| v.is_array() || v.is_object()) =>
        {
            Some(columns)
        }
        _ => None,
    }
}

/// Pivots columns into records, one per row label in order of first appearance
fn read_columns(columns: Map<String, Value>) -> Result<DataFrame, DatasetError> {
    let mut lengths = columns
        .values()
        .filter_map(|cells| cells.as_array().map(Vec::len));
    if let Some(first) = lengths.next()
        && lengths.any(|len| len != first)
    {
        return Err(DatasetError::Read(
            "all column arrays must be of the same length".to_string(),
        ));
    }

    let mut labels: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for cells in columns.values() {
        let column_labels: Vec<String> = match cells {
            Value::Array(values) => (0..values.len()).map(|i| i.to_string()).collect(),
            Value::Object(values) => values.keys().cloned().collect(),
            _ => Vec::new(),
        };
        for label in column_labels {
            if seen.insert(label.clone()) {
                labels.push(label);
            }
        }
    }

    if labels.is_empty() {
        let empty: Vec<Column> = columns
            .keys()
            .map(|name| Column::new_empty(name.as_str().into(), &DataType::Null))
            .collect();
        return Ok(DataFrame::new(empty)?);
    }

    let records: Vec<Value> = labels
        .iter()
        .map(|label| {
            let record: Map<String, Value> = columns
                .iter()
                .map(|(name, cells)| {
                    let cell = match cells {
                        Value::Array(values) => label
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| values.get(i))
                            .cloned(),
                        Value::Object(values) => values.get(label).cloned(),
                        _ => None,
                    };
                    (name.clone(), cell.unwrap_or(Value::Null))
                })
                .collect();
            Value::Object(record)
        })
        .collect();

    let bytes = serde_json::to_vec(&records).map_err(read_err)?;
    read_with(bytes, JsonFormat::Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_json(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_reads_array_of_records() {
        let (_dir, path) = write_json(
            r#"[{"id": 1, "name": "alice"}, {"id": 2, "name": null}, {"id": 3, "name": "carol"}]"#,
        );
        let (frame, header) = read_json(&path).unwrap();

        assert_eq!(header, vec!["id", "name"]);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.column("name").unwrap().null_count(), 1);
    }

    #[test]
    fn test_reads_json_lines() {
        let (_dir, path) = write_json("{\"a\": 1.5}\n{\"a\": 2.5}\n");
        let (frame, header) = read_json(&path).unwrap();

        assert_eq!(header, vec!["a"]);
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn test_single_record_line() {
        let (_dir, path) = write_json(r#"{"a": 1, "b": "x"}"#);
        let (frame, header) = read_json(&path).unwrap();

        assert_eq!(header, vec!["a", "b"]);
        assert_eq!(frame.height(), 1);
    }

    #[test]
    fn test_reads_object_of_column_arrays() {
        let (_dir, path) = write_json(r#"{"b": [1, 2, 3], "a": ["x", "y", "z"]}"#);
        let (frame, header) = read_json(&path).unwrap();

        assert_eq!(header, vec!["b", "a"]);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.column("b").unwrap().dtype(), &DataType::Int64);
        assert_eq!(frame.column("a").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_reads_object_of_labelled_columns() {
        let (_dir, path) = write_json(
            r#"{"city": {"0": "Paris", "1": "Rome", "2": "Oslo"}, "pop": {"0": 2.1, "2": 0.7}}"#,
        );
        let (frame, header) = read_json(&path).unwrap();

        assert_eq!(header, vec!["city", "pop"]);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.column("pop").unwrap().null_count(), 1);

        let cities = frame
            .column("city")
            .unwrap()
            .as_materialized_series()
            .str()
            .unwrap()
            .clone();
        assert_eq!(cities.get(2), Some("Oslo"));
    }

    #[test]
    fn test_column_arrays_of_different_lengths() {
        let (_dir, path) = write_json(r#"{"a": [1, 2, 3], "b": [1]}"#);
        let err = read_json(&path).unwrap_err();
        assert!(matches!(err, DatasetError::Read(_)));
        assert!(err.to_string().contains("same length"));
    }

    #[test]
    fn test_rejects_scalars_and_empty_files() {
        let (_dir, path) = write_json("42");
        assert!(matches!(read_json(&path), Err(DatasetError::Read(_))));

        let (_dir, path) = write_json("   ");
        assert!(matches!(read_json(&path), Err(DatasetError::Read(_))));
    }

    #[test]
    fn test_malformed_json_is_read_error() {
        let (_dir, path) = write_json(r#"[{"a": 1}, {"a": "#);
        assert!(matches!(read_json(&path), Err(DatasetError::Read(_))));
    }
}
