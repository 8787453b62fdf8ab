//! Loading of uploaded tabular files into a polars `DataFrame`.
//!
//! CSV and JSON are parsed by polars. The first worksheet of an Excel
//! workbook is read with `zip` and `quick-xml` (`.xlsx`) or `calamine` (`.xls`).

mod delimited;
mod records;
mod workbook;

use polars::prelude::*;
use std::fmt::Display;
use std::path::Path;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Error reading file: {0}")]
    Read(String),

    #[error("Dataframe error: {0}")]
    Polars(#[from] PolarsError),
}

pub(crate) fn read_err(e: impl Display) -> DatasetError {
    DatasetError::Read(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Csv,
    Xlsx,
    Xls,
    Json,
}

impl DatasetFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        Self::from_extension(ext)
            .ok_or_else(|| DatasetError::UnsupportedFormat(format!(".{}", ext.to_lowercase())))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Xlsx => "XLSX",
            Self::Xls => "XLS",
            Self::Json => "JSON",
        }
    }
}

/// A parsed upload together with the facts the report needs about its source
#[derive(Debug, Clone)]
pub struct Dataset {
    pub file_name: String,
    pub format: DatasetFormat,
    pub size_bytes: u64,
    pub frame: DataFrame,
    /// Column names as declared in the file, before duplicate renaming
    pub header: Vec<String>,
}

/// Summary of a loaded dataset, shown in reports and API responses
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DatasetInfo {
    pub file_name: String,
    pub format: DatasetFormat,
    pub rows: usize,
    pub columns: usize,
    pub size_bytes: u64,
}

impl Dataset {
    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            file_name: self.file_name.clone(),
            format: self.format,
            rows: self.row_count(),
            columns: self.column_count(),
            size_bytes: self.size_bytes,
        }
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn column_count(&self) -> usize {
        self.frame.width()
    }

    /// Declared column names that occur more than once, in first-seen order
    pub fn duplicate_columns(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut duplicates = Vec::new();
        for name in &self.header {
            if !seen.insert(name.as_str()) && !duplicates.contains(name) {
                duplicates.push(name.clone());
            }
        }
        duplicates
    }
}

/// Reads the file at `path`, choosing the parser from its extension
pub fn load_dataset(path: &Path) -> Result<Dataset, DatasetError> {
    let format = DatasetFormat::from_path(path)?;
    let size_bytes = std::fs::metadata(path).map_err(read_err)?.len();

    let (frame, header) = match format {
        DatasetFormat::Csv => delimited::read_csv(path)?,
        DatasetFormat::Json => records::read_json(path)?,
        DatasetFormat::Xlsx => workbook::read_xlsx(path)?,
        DatasetFormat::Xls => workbook::read_xls(path)?,
    };

    tracing::debug!(
        "Loaded {} as {}: {} rows x {} columns",
        path.display(),
        format.label(),
        frame.height(),
        frame.width()
    );

    Ok(Dataset {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        format,
        size_bytes,
        frame,
        header,
    })
}
