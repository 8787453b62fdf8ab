//! The fixed expectation suite run against every uploaded dataset.
//!
//! Table-level expectations come first, followed by per-column expectations
//! in column order. Which column expectations apply depends on the column's
//! dtype: numeric (booleans included, as 0/1), string or temporal.

use crate::config::SuiteConfig;
use crate::services::dataset::{Dataset, DatasetError};
use polars::prelude::*;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationType {
    ExpectTableRowCountToBeGreaterThan,
    ExpectTableColumnsToMatchSet,
    ExpectTableColumnsToBeUnique,
    ExpectColumnValuesToNotBeNull,
    ExpectColumnValuesToBeInTypeList,
    ExpectColumnValuesToBeBetween,
    ExpectColumnMeanToBeBetween,
    ExpectColumnMedianToBeBetween,
    ExpectColumnValuesToBeUnique,
    ExpectColumnValueLengthsToBeBetween,
    ExpectColumnValuesToBeInSet,
}

impl ExpectationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpectTableRowCountToBeGreaterThan => "expect_table_row_count_to_be_greater_than",
            Self::ExpectTableColumnsToMatchSet => "expect_table_columns_to_match_set",
            Self::ExpectTableColumnsToBeUnique => "expect_table_columns_to_be_unique",
            Self::ExpectColumnValuesToNotBeNull => "expect_column_values_to_not_be_null",
            Self::ExpectColumnValuesToBeInTypeList => "expect_column_values_to_be_in_type_list",
            Self::ExpectColumnValuesToBeBetween => "expect_column_values_to_be_between",
            Self::ExpectColumnMeanToBeBetween => "expect_column_mean_to_be_between",
            Self::ExpectColumnMedianToBeBetween => "expect_column_median_to_be_between",
            Self::ExpectColumnValuesToBeUnique => "expect_column_values_to_be_unique",
            Self::ExpectColumnValueLengthsToBeBetween => "expect_column_value_lengths_to_be_between",
            Self::ExpectColumnValuesToBeInSet => "expect_column_values_to_be_in_set",
        }
    }

    /// Human readable form, e.g. "Expect Column Values To Not Be Null"
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for ExpectationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single expectation. `column` is `None` for table-level checks.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExpectationResult {
    pub expectation_type: ExpectationType,
    pub success: bool,
    pub column: Option<String>,
    #[schema(value_type = Object)]
    pub result: Value,
}

impl ExpectationResult {
    fn table(expectation_type: ExpectationType, success: bool, result: Value) -> Self {
        Self {
            expectation_type,
            success,
            column: None,
            result,
        }
    }

    fn column(expectation_type: ExpectationType, success: bool, column: &str, result: Value) -> Self {
        Self {
            expectation_type,
            success,
            column: Some(column.to_string()),
            result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Numeric,
    String,
    Temporal,
    Other,
}

impl ColumnKind {
    fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean => ColumnKind::Numeric,
            DataType::String | DataType::Categorical(_, _) => ColumnKind::String,
            DataType::Date | DataType::Datetime(_, _) | DataType::Time | DataType::Duration(_) => {
                ColumnKind::Temporal
            }
            _ => ColumnKind::Other,
        }
    }
}

fn dtype_name(dtype: &DataType) -> String {
    match dtype {
        DataType::Boolean => "bool".to_string(),
        DataType::Int8 => "int8".to_string(),
        DataType::Int16 => "int16".to_string(),
        DataType::Int32 => "int32".to_string(),
        DataType::Int64 => "int64".to_string(),
        DataType::UInt8 => "uint8".to_string(),
        DataType::UInt16 => "uint16".to_string(),
        DataType::UInt32 => "uint32".to_string(),
        DataType::UInt64 => "uint64".to_string(),
        DataType::Float32 => "float32".to_string(),
        DataType::Float64 => "float64".to_string(),
        other => other.to_string(),
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Renders a float the way the report has always shown them: `3.0`, `2.5`
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

struct NumericStats {
    min: f64,
    max: f64,
    mean: f64,
    median: f64,
}

fn numeric_stats(non_null: &Series) -> PolarsResult<Option<NumericStats>> {
    let floats = non_null.cast(&DataType::Float64)?;
    let mut values: Vec<f64> = floats
        .f64()?
        .into_iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .collect();

    if values.is_empty() {
        return Ok(None);
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };

    Ok(Some(NumericStats {
        min: values[0],
        max: values[n - 1],
        mean: values.iter().sum::<f64>() / n as f64,
        median,
    }))
}

fn any_value_to_json(value: &AnyValue<'_>) -> Value {
    match value {
        AnyValue::Boolean(b) => json!(b),
        AnyValue::Int8(v) => json!(v),
        AnyValue::Int16(v) => json!(v),
        AnyValue::Int32(v) => json!(v),
        AnyValue::Int64(v) => json!(v),
        AnyValue::UInt8(v) => json!(v),
        AnyValue::UInt16(v) => json!(v),
        AnyValue::UInt32(v) => json!(v),
        AnyValue::UInt64(v) => json!(v),
        AnyValue::Float32(v) => json!(v),
        AnyValue::Float64(v) => json!(v),
        AnyValue::String(s) => json!(s),
        AnyValue::StringOwned(s) => json!(s.as_str()),
        other => json!(other.to_string()),
    }
}

/// First `limit` distinct values in order of appearance
fn first_distinct_values(non_null: &Series, limit: usize) -> PolarsResult<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut values = Vec::with_capacity(limit);

    for i in 0..non_null.len() {
        if values.len() >= limit {
            break;
        }
        let value = non_null.get(i)?;
        if seen.insert(value.to_string()) {
            values.push(any_value_to_json(&value));
        }
    }

    Ok(values)
}

/// Runs the expectation suite against loaded datasets
#[derive(Debug, Clone)]
pub struct ExpectationSuite {
    config: SuiteConfig,
}

impl ExpectationSuite {
    pub fn new(config: SuiteConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, dataset: &Dataset) -> Result<Vec<ExpectationResult>, DatasetError> {
        let mut results = Self::table_expectations(dataset);

        let total_rows = dataset.row_count();
        for column in dataset.frame.get_columns() {
            let series = column.as_materialized_series();
            results.extend(self.column_expectations(series, total_rows)?);
        }

        tracing::debug!(
            "Evaluated {} expectations for {}",
            results.len(),
            dataset.file_name
        );

        Ok(results)
    }

    fn table_expectations(dataset: &Dataset) -> Vec<ExpectationResult> {
        let row_count = dataset.row_count();
        let columns: Vec<String> = dataset
            .frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        let duplicates = dataset.duplicate_columns();

        let uniqueness = if duplicates.is_empty() {
            json!({ "observed_value": "No duplicate columns" })
        } else {
            json!({
                "observed_value": "Duplicate columns found",
                "duplicate_columns": duplicates,
            })
        };

        vec![
            ExpectationResult::table(
                ExpectationType::ExpectTableRowCountToBeGreaterThan,
                row_count > 0,
                json!({
                    "observed_value": row_count,
                    "element_count": row_count,
                    "missing_count": 0,
                }),
            ),
            ExpectationResult::table(
                ExpectationType::ExpectTableColumnsToMatchSet,
                true,
                json!({
                    "observed_value": columns,
                    "details": format!("Table has {} columns", columns.len()),
                }),
            ),
            ExpectationResult::table(
                ExpectationType::ExpectTableColumnsToBeUnique,
                duplicates.is_empty(),
                uniqueness,
            ),
        ]
    }

    fn column_expectations(
        &self,
        series: &Series,
        total_rows: usize,
    ) -> PolarsResult<Vec<ExpectationResult>> {
        let name = series.name().as_str();
        let mut results = Vec::new();

        let null_count = series.null_count();
        let missing_percent = if total_rows > 0 {
            round_to(null_count as f64 / total_rows as f64 * 100.0, 2)
        } else {
            0.0
        };
        results.push(ExpectationResult::column(
            ExpectationType::ExpectColumnValuesToNotBeNull,
            null_count == 0,
            name,
            json!({
                "element_count": total_rows,
                "missing_count": null_count,
                "missing_percent": missing_percent,
                "unexpected_count": null_count,
            }),
        ));

        let non_null = series.drop_nulls();
        if non_null.is_empty() {
            return Ok(results);
        }

        let kind = ColumnKind::of(series.dtype());
        let unique_count = match kind {
            ColumnKind::Other => None,
            _ => Some(non_null.n_unique()?),
        };

        match kind {
            ColumnKind::Numeric => {
                results.push(ExpectationResult::column(
                    ExpectationType::ExpectColumnValuesToBeInTypeList,
                    true,
                    name,
                    json!({
                        "observed_value": dtype_name(series.dtype()),
                        "details": "Column is numeric type",
                    }),
                ));

                if let Some(stats) = numeric_stats(&non_null)? {
                    results.extend(Self::numeric_expectations(name, &stats, non_null.len(), null_count));
                }
            }
            ColumnKind::String => {
                results.push(ExpectationResult::column(
                    ExpectationType::ExpectColumnValuesToBeInTypeList,
                    true,
                    name,
                    json!({
                        "observed_value": "string/object",
                        "details": "Column is string/object type",
                    }),
                ));
                results.push(self.length_expectation(name, &non_null)?);
            }
            ColumnKind::Temporal => {
                results.push(ExpectationResult::column(
                    ExpectationType::ExpectColumnValuesToBeInTypeList,
                    true,
                    name,
                    json!({
                        "observed_value": "datetime",
                        "details": "Column is datetime type",
                    }),
                ));
            }
            ColumnKind::Other => {}
        }

        // Identifier-like columns: every row holds a distinct value
        if matches!(kind, ColumnKind::Numeric | ColumnKind::String)
            && unique_count == Some(total_rows)
        {
            results.push(ExpectationResult::column(
                ExpectationType::ExpectColumnValuesToBeUnique,
                true,
                name,
                json!({
                    "observed_value": "All values are unique",
                    "unique_count": total_rows,
                    "total_count": total_rows,
                }),
            ));
        }

        if let Some(unique_count) =
            unique_count.filter(|n| *n > 0 && *n < self.config.categorical_threshold)
        {
            let sample = first_distinct_values(&non_null, self.config.sample_size)?;
            results.push(ExpectationResult::column(
                ExpectationType::ExpectColumnValuesToBeInSet,
                true,
                name,
                json!({
                    "observed_value": format!("{} unique values", unique_count),
                    "element_count": non_null.len(),
                    "missing_count": null_count,
                    "unexpected_count": 0,
                    "partial_unexpected_list": sample,
                }),
            ));
        }

        Ok(results)
    }

    fn numeric_expectations(
        name: &str,
        stats: &NumericStats,
        element_count: usize,
        null_count: usize,
    ) -> Vec<ExpectationResult> {
        let min = format_float(stats.min);
        let max = format_float(stats.max);

        vec![
            ExpectationResult::column(
                ExpectationType::ExpectColumnValuesToBeBetween,
                true,
                name,
                json!({
                    "observed_value": format!("min: {}, max: {}", min, max),
                    "element_count": element_count,
                    "missing_count": null_count,
                }),
            ),
            ExpectationResult::column(
                ExpectationType::ExpectColumnMeanToBeBetween,
                stats.min <= stats.mean && stats.mean <= stats.max,
                name,
                json!({
                    "observed_value": round_to(stats.mean, 4),
                    "details": format!("Mean is within range [{}, {}]", min, max),
                }),
            ),
            ExpectationResult::column(
                ExpectationType::ExpectColumnMedianToBeBetween,
                stats.min <= stats.median && stats.median <= stats.max,
                name,
                json!({
                    "observed_value": round_to(stats.median, 4),
                    "details": format!("Median is within range [{}, {}]", min, max),
                }),
            ),
        ]
    }

    fn length_expectation(&self, name: &str, non_null: &Series) -> PolarsResult<ExpectationResult> {
        let strings = non_null.cast(&DataType::String)?;
        let lengths: Vec<usize> = strings
            .str()?
            .into_iter()
            .flatten()
            .map(|s| s.chars().count())
            .collect();

        let min_length = lengths.iter().copied().min().unwrap_or(0);
        let max_length = lengths.iter().copied().max().unwrap_or(0);
        let limit = self.config.max_string_length;
        let within_limit = max_length <= limit;

        let details = if within_limit {
            "String lengths within acceptable range".to_string()
        } else {
            format!("Some strings exceed {} chars", limit)
        };

        Ok(ExpectationResult::column(
            ExpectationType::ExpectColumnValueLengthsToBeBetween,
            within_limit,
            name,
            json!({
                "observed_value": format!("min: {}, max: {}", min_length, max_length),
                "details": details,
            }),
        ))
    }
}
