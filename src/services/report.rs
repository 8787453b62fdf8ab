//! Summary statistics and the standalone HTML report.

use crate::services::dataset::DatasetInfo;
use crate::services::expectations::ExpectationResult;
use crate::utils::html::escape;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::{self, Write};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ValidationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage of passed expectations, 0 when nothing was evaluated
    pub success_rate: f64,
}

impl ValidationSummary {
    pub fn from_results(results: &[ExpectationResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.success).count();
        let success_rate = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total,
            passed,
            failed: total - passed,
            success_rate,
        }
    }
}

/// Results split into table-level ones and per-column groups in first-seen column order
pub struct GroupedResults<'a> {
    pub global: Vec<&'a ExpectationResult>,
    pub columns: Vec<(&'a str, Vec<&'a ExpectationResult>)>,
}

pub fn group_results(results: &[ExpectationResult]) -> GroupedResults<'_> {
    let mut global = Vec::new();
    let mut columns: Vec<(&str, Vec<&ExpectationResult>)> = Vec::new();

    for result in results {
        match result.column.as_deref() {
            None => global.push(result),
            Some(name) => match columns.iter_mut().find(|(col, _)| *col == name) {
                Some((_, group)) => group.push(result),
                None => columns.push((name, vec![result])),
            },
        }
    }

    GroupedResults { global, columns }
}

/// `1234567` -> `1,234,567`
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Appended to an upload's name to form its report's name
pub const REPORT_SUFFIX: &str = "_report.html";

/// File name the report for `file_name` is stored under
pub fn report_file_name(file_name: &str) -> String {
    format!("{}{}", file_name, REPORT_SUFFIX)
}

const REPORT_STYLE: &str = "\
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #eef1f7; padding: 20px; color: #333; }
.container { max-width: 1200px; margin: 0 auto; background: #fff; border-radius: 12px; box-shadow: 0 10px 30px rgba(0,0,0,0.12); overflow: hidden; }
.header { background: linear-gradient(135deg, #4f6bd8 0%, #6a4ba2 100%); color: #fff; padding: 32px; text-align: center; }
.header h1 { font-size: 2.2em; margin-bottom: 8px; }
.stats { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 16px; padding: 24px; background: #f8f9fa; }
.stat-card { background: #fff; padding: 20px; border-radius: 8px; text-align: center; border-top: 4px solid #999; }
.stat-card.total { border-top-color: #4f6bd8; }
.stat-card.success { border-top-color: #28a745; }
.stat-card.failed { border-top-color: #dc3545; }
.stat-card.rate { border-top-color: #f0ad4e; }
.stat-card .number { font-size: 2.2em; font-weight: bold; }
.stat-card .label { color: #666; font-size: 0.85em; text-transform: uppercase; letter-spacing: 1px; }
.content { padding: 24px; }
.dataset-info { background: #f8f9fa; padding: 20px; border-radius: 8px; margin-bottom: 24px; }
.dataset-info-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(180px, 1fr)); gap: 12px; }
.info-item { background: #fff; padding: 12px; border-radius: 6px; }
.info-label { color: #666; font-size: 0.85em; }
.info-value { font-weight: bold; font-size: 1.2em; }
.section { margin-bottom: 32px; }
.section-title { font-size: 1.5em; margin-bottom: 16px; padding-bottom: 8px; border-bottom: 3px solid #4f6bd8; }
.column-group { background: #f8f9fa; padding: 16px; border-radius: 8px; margin-bottom: 16px; }
.column-name { font-size: 1.2em; font-weight: bold; margin-bottom: 12px; }
.expectation-card { background: #fff; border-left: 4px solid #999; padding: 12px 16px; margin-bottom: 10px; border-radius: 4px; }
.expectation-card.success { border-left-color: #28a745; }
.expectation-card.failed { border-left-color: #dc3545; }
.expectation-header { display: flex; justify-content: space-between; align-items: center; margin-bottom: 8px; }
.expectation-type { font-weight: 600; }
.status-badge { padding: 4px 12px; border-radius: 12px; font-size: 0.8em; font-weight: bold; color: #fff; }
.status-badge.success { background: #28a745; }
.status-badge.failed { background: #dc3545; }
.expectation-details pre { background: #f4f4f4; padding: 10px; border-radius: 4px; overflow-x: auto; font-size: 0.85em; }
.back-button { display: inline-block; padding: 12px 28px; background: #4f6bd8; color: #fff; text-decoration: none; border-radius: 6px; font-weight: bold; }
";

fn write_expectation_card(html: &mut String, result: &ExpectationResult) -> fmt::Result {
    let (status_class, status_text, icon) = if result.success {
        ("success", "PASSED", "&#x2705;")
    } else {
        ("failed", "FAILED", "&#x274C;")
    };
    let details = serde_json::to_string_pretty(&result.result).unwrap_or_default();

    write!(
        html,
        r#"
            <div class="expectation-card {status_class}">
                <div class="expectation-header">
                    <span class="expectation-type">{icon} {title}</span>
                    <span class="status-badge {status_class}">{status_text}</span>
                </div>
                <div class="expectation-details">
                    <pre>{details}</pre>
                </div>
            </div>"#,
        title = escape(&result.expectation_type.title()),
        details = escape(&details),
    )
}

fn write_stat_card(html: &mut String, class: &str, value: &str, label: &str) -> fmt::Result {
    write!(
        html,
        r#"
        <div class="stat-card {class}">
            <div class="number">{value}</div>
            <div class="label">{label}</div>
        </div>"#
    )
}

fn write_info_item(html: &mut String, label: &str, value: &str) -> fmt::Result {
    write!(
        html,
        r#"
                <div class="info-item">
                    <div class="info-label">{label}</div>
                    <div class="info-value">{value}</div>
                </div>"#,
        value = escape(value),
    )
}

/// Renders the self-contained report page
pub fn render_report(
    info: &DatasetInfo,
    results: &[ExpectationResult],
    generated_at: NaiveDateTime,
) -> Result<String, fmt::Error> {
    let summary = ValidationSummary::from_results(results);
    let grouped = group_results(results);
    let file_name = escape(&info.file_name);

    let mut html = String::with_capacity(16 * 1024 + results.len() * 512);
    write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Validation Report - {file_name}</title>
    <style>
{REPORT_STYLE}    </style>
</head>
<body>
<div class="container">
    <div class="header">
        <h1>Data Validation Report</h1>
        <p><strong>{file_name}</strong></p>
        <p>Generated: {timestamp}</p>
    </div>
    <div class="stats">"#,
        timestamp = generated_at.format("%Y-%m-%d %H:%M:%S"),
    )?;

    write_stat_card(&mut html, "total", &summary.total.to_string(), "Total Tests")?;
    write_stat_card(&mut html, "success", &summary.passed.to_string(), "Passed")?;
    write_stat_card(&mut html, "failed", &summary.failed.to_string(), "Failed")?;
    write_stat_card(
        &mut html,
        "rate",
        &format!("{:.1}%", summary.success_rate),
        "Success Rate",
    )?;

    html.push_str(
        r#"
    </div>
    <div class="content">
        <div class="dataset-info">
            <h3>Dataset Information</h3>
            <div class="dataset-info-grid">"#,
    );
    write_info_item(&mut html, "Rows", &group_thousands(info.rows))?;
    write_info_item(&mut html, "Columns", &info.columns.to_string())?;
    write_info_item(
        &mut html,
        "File Size",
        &format!("{:.2} KB", info.size_bytes as f64 / 1024.0),
    )?;
    write_info_item(&mut html, "Format", info.format.label())?;
    html.push_str(
        r#"
            </div>
        </div>"#,
    );

    if !grouped.global.is_empty() {
        html.push_str(
            r#"
        <div class="section">
            <h2 class="section-title">Global Expectations</h2>"#,
        );
        for result in &grouped.global {
            write_expectation_card(&mut html, result)?;
        }
        html.push_str("\n        </div>");
    }

    if !grouped.columns.is_empty() {
        html.push_str(
            r#"
        <div class="section">
            <h2 class="section-title">Column Expectations</h2>"#,
        );
        for (column, expectations) in &grouped.columns {
            let passed = expectations.iter().filter(|r| r.success).count();
            write!(
                html,
                r#"
            <div class="column-group">
                <div class="column-name">{name} <span style="font-size: 0.8em; color: #666;">({passed}/{total} passed)</span></div>"#,
                name = escape(column),
                total = expectations.len(),
            )?;
            for result in expectations {
                write_expectation_card(&mut html, result)?;
            }
            html.push_str("\n            </div>");
        }
        html.push_str("\n        </div>");
    }

    html.push_str(
        r#"
        <div style="text-align: center; padding: 20px 0;">
            <a href="/" class="back-button">&larr; Upload New Dataset</a>
        </div>
    </div>
</div>
</body>
</html>
"#,
    );

    Ok(html)
}
