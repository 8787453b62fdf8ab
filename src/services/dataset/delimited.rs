use super::{DatasetError, read_err};
use polars::prelude::*;
use std::path::Path;

/// Cell contents treated as missing, on top of empty fields
const NA_VALUES: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Parses a headed CSV file. Schema inference scans every row; date-like
/// text is left as strings.
pub(super) fn read_csv(path: &Path) -> Result<(DataFrame, Vec<String>), DatasetError> {
    let header = read_declared_header(path)?;

    let null_values = NullValues::AllColumns(NA_VALUES.iter().map(|v| (*v).into()).collect());

    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(
            CsvParseOptions::default()
                .with_quote_char(Some(b'"'))
                .with_null_values(Some(null_values)),
        )
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(read_err)?
        .finish()
        .map_err(read_err)?;

    Ok((frame, header))
}

/// The header row exactly as written; polars renames duplicates on load
fn read_declared_header(path: &Path) -> Result<Vec<String>, DatasetError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(read_err)?;

    let header = reader
        .headers()
        .map_err(read_err)?
        .iter()
        .map(|name| name.to_string())
        .collect();

    Ok(header)
}
