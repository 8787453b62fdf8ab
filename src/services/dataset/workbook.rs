//! First-worksheet readers for Excel workbooks.
//!
//! `.xlsx` parts are unpacked with `zip` and parsed with `quick-xml`. Legacy
//! `.xls` (BIFF) workbooks go through `calamine`. Both end up in the same
//! sparse row model before columns are typed.

use super::{DatasetError, read_err};
use ::zip::ZipArchive;
use calamine::{Data, Reader as _, Xls, open_workbook};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use polars::prelude::*;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

/// Sheet bounds of the Office Open XML format
const MAX_ROWS: usize = 1_048_576;
const MAX_COLUMNS: usize = 16_384;

/// Largest dense grid a single sheet may expand to
const MAX_CELLS: usize = 10_000_000;

#[derive(Debug, Clone, PartialEq)]
enum CellValue {
    Number(f64),
    Bool(bool),
    Text(String),
    DateTime(NaiveDateTime),
}

impl CellValue {
    fn display(&self) -> String {
        match self {
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Populated cells of one row as `(column, value)`
type Row = Vec<(usize, CellValue)>;

fn out_of_bounds(what: &str, reference: &str) -> DatasetError {
    DatasetError::Read(format!("{} {} is outside the worksheet bounds", what, reference))
}

pub(super) fn read_xlsx(path: &Path) -> Result<(DataFrame, Vec<String>), DatasetError> {
    let bytes = std::fs::read(path).map_err(read_err)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DatasetError::Read(format!("not a valid xlsx workbook ({})", e)))?;

    let shared_strings = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let workbook = match read_entry(&mut archive, "xl/workbook.xml")? {
        Some(xml) => parse_workbook(&xml)?,
        None => WorkbookProps::default(),
    };
    let styles = CellStyles {
        date_formats: match read_entry(&mut archive, "xl/styles.xml")? {
            Some(xml) => parse_date_formats(&xml)?,
            None => Vec::new(),
        },
        date1904: workbook.date1904,
    };

    let sheet_path = first_sheet_path(&mut archive, workbook.first_sheet)?;
    let sheet_xml = read_entry(&mut archive, &sheet_path)?
        .ok_or_else(|| DatasetError::Read(format!("worksheet {} is missing", sheet_path)))?;

    let rows = parse_sheet(&sheet_xml, &shared_strings, &styles)?;
    build_frame(rows)
}

pub(super) fn read_xls(path: &Path) -> Result<(DataFrame, Vec<String>), DatasetError> {
    let mut workbook: Xls<_> = open_workbook(path)
        .map_err(|e| DatasetError::Read(format!("not a valid xls workbook ({})", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DatasetError::Read("workbook contains no worksheets".to_string()))?
        .map_err(read_err)?;

    let Some((top, left)) = range.start() else {
        return build_frame(Vec::new());
    };

    let mut rows: Vec<Row> = vec![Vec::new(); top as usize];
    for cells in range.rows() {
        rows.push(
            cells
                .iter()
                .enumerate()
                .filter_map(|(offset, cell)| legacy_cell(cell).map(|v| (left as usize + offset, v)))
                .collect(),
        );
    }
    trim_trailing_blank_rows(&mut rows);

    build_frame(rows)
}

fn legacy_cell(cell: &Data) -> Option<CellValue> {
    match cell {
        Data::Empty => None,
        Data::Int(n) => Some(CellValue::Number(*n as f64)),
        Data::Float(n) => Some(CellValue::Number(*n)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::DateTime(dt) => Some(match dt.as_datetime() {
            Some(value) => CellValue::DateTime(value),
            None => CellValue::Number(dt.as_f64()),
        }),
        Data::DateTimeIso(s) => Some(match parse_iso_datetime(s) {
            Some(value) => CellValue::DateTime(value),
            None => CellValue::Text(s.clone()),
        }),
        Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
        Data::Error(e) => Some(CellValue::Text(e.to_string())),
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, DatasetError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(::zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(read_err(e)),
    };

    let mut content = String::new();
    file.read_to_string(&mut content).map_err(read_err)?;
    Ok(Some(content))
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| unescape(&String::from_utf8_lossy(&attr.value)))
}

/// Resolves `&amp;`-style and numeric references split out of text events
fn resolve_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Attribute values keep their entity references; unknown ones stay literal
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail
            .find(';')
            .and_then(|end| resolve_reference(&tail[..end]).map(|c| (c, end)))
        {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Default)]
struct WorkbookProps {
    /// Relationship id of the first `<sheet>`
    first_sheet: Option<String>,
    date1904: bool,
}

fn parse_workbook(xml: &str) -> Result<WorkbookProps, DatasetError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut props = WorkbookProps::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"workbookPr" => {
                    props.date1904 = matches!(
                        attribute(&e, b"date1904").as_deref(),
                        Some("1") | Some("true")
                    );
                }
                b"sheet" => {
                    props.first_sheet = attribute(&e, b"r:id");
                    break;
                }
                _ => (),
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(read_err(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(props)
}

/// Worksheet part of the first `<sheet>` in the workbook, via its relationship id
fn first_sheet_path<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    relationship_id: Option<String>,
) -> Result<String, DatasetError> {
    if let Some(id) = relationship_id
        && let Some(rels) = read_entry(archive, "xl/_rels/workbook.xml.rels")?
    {
        let mut reader = Reader::from_str(&rels);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e))
                    if e.local_name().as_ref() == b"Relationship"
                        && attribute(&e, b"Id").as_deref() == Some(id.as_str()) =>
                {
                    if let Some(target) = attribute(&e, b"Target") {
                        return Ok(match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("xl/{}", target),
                        });
                    }
                    break;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(read_err(e)),
                _ => (),
            }
            buf.clear();
        }
    }

    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
        .map(|name| name.to_string())
        .collect();
    sheets.sort();

    sheets
        .into_iter()
        .next()
        .ok_or_else(|| DatasetError::Read("workbook contains no worksheets".to_string()))
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, DatasetError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs (<rPh>) carry their own <t> elements that are not cell text
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = !in_phonetic,
                b"rPh" => in_phonetic = true,
                _ => (),
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => (),
            },
            Ok(Event::Text(e)) if in_text => current.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::CData(e)) if in_text => current.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::GeneralRef(e)) if in_text => {
                if let Some(c) = resolve_reference(&String::from_utf8_lossy(&e)) {
                    current.push(c);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(read_err(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(strings)
}

/// Built-in number formats that render as dates or times
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58 | 71..=81)
}

/// A custom format is a date format when it uses a date or time token
/// outside quoted literals, escapes and `[...]` sections
fn is_date_format_code(code: &str) -> bool {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut chars = code.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '\\' | '_' | '*' => {
                chars.next();
            }
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            _ if in_brackets => {}
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }

    false
}

/// For every `cellXfs` entry, whether its number format is a date format
fn parse_date_formats(xml: &str) -> Result<Vec<bool>, DatasetError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut custom: HashMap<u32, bool> = HashMap::new();
    let mut in_cell_xfs = false;
    let mut date_formats = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"numFmt" => {
                    let id = attribute(&e, b"numFmtId").and_then(|v| v.parse::<u32>().ok());
                    if let (Some(id), Some(code)) = (id, attribute(&e, b"formatCode")) {
                        custom.insert(id, is_date_format_code(&code));
                    }
                }
                b"xf" if in_cell_xfs => {
                    let id = attribute(&e, b"numFmtId")
                        .and_then(|v| v.parse::<u32>().ok())
                        .unwrap_or(0);
                    let is_date = custom
                        .get(&id)
                        .copied()
                        .unwrap_or_else(|| is_builtin_date_format(id));
                    date_formats.push(is_date);
                }
                _ => (),
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(read_err(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(date_formats)
}

#[derive(Debug, Default)]
struct CellStyles {
    /// Indexed by a cell's `s` attribute
    date_formats: Vec<bool>,
    date1904: bool,
}

impl CellStyles {
    fn is_date(&self, style: Option<usize>) -> bool {
        style
            .and_then(|s| self.date_formats.get(s))
            .copied()
            .unwrap_or(false)
    }
}

/// Converts an Excel serial day number to a timestamp
fn excel_datetime(serial: f64, date1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }

    let epoch = if date1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else if serial < 60.0 {
        // The 1900 system counts a 29 February 1900 that never existed
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };

    let millis = (serial * 86_400_000.0).round() as i64;
    epoch
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}

fn parse_iso_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
}

/// Zero-based column index of an `A1`-style reference, `None` without letters
fn column_index(reference: &str) -> Result<Option<usize>, DatasetError> {
    let mut index = 0usize;
    let mut any = false;

    for b in reference.bytes().take_while(u8::is_ascii_alphabetic) {
        any = true;
        let digit = (b.to_ascii_uppercase() - b'A' + 1) as usize;
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add(digit))
            .filter(|i| *i <= MAX_COLUMNS)
            .ok_or_else(|| out_of_bounds("cell", reference))?;
    }

    Ok(any.then(|| index - 1))
}

/// One-based `r` of a `<row>`, if present
fn row_number(element: &BytesStart<'_>) -> Result<Option<usize>, DatasetError> {
    match attribute(element, b"r") {
        None => Ok(None),
        Some(r) => match r.trim().parse::<usize>() {
            Ok(n) if (1..=MAX_ROWS).contains(&n) => Ok(Some(n)),
            _ => Err(out_of_bounds("row", &r)),
        },
    }
}

/// Rows omitted from the sheet are blank rows
fn pad_rows(rows: &mut Vec<Row>, number: Option<usize>) -> Result<(), DatasetError> {
    if let Some(number) = number {
        while rows.len() + 1 < number {
            rows.push(Vec::new());
        }
    }
    if rows.len() >= MAX_ROWS {
        return Err(out_of_bounds("row", &(rows.len() + 1).to_string()));
    }
    Ok(())
}

fn cell_column(element: &BytesStart<'_>, next_column: usize) -> Result<usize, DatasetError> {
    let column = match attribute(element, b"r") {
        Some(reference) => column_index(&reference)?.unwrap_or(next_column),
        None => next_column,
    };
    if column >= MAX_COLUMNS {
        return Err(out_of_bounds("column", &(column + 1).to_string()));
    }
    Ok(column)
}

struct PendingCell {
    column: usize,
    cell_type: Option<String>,
    style: Option<usize>,
    text: String,
    has_value: bool,
}

impl PendingCell {
    fn resolve(self, shared_strings: &[String], styles: &CellStyles) -> Option<CellValue> {
        if !self.has_value {
            return None;
        }
        match self.cell_type.as_deref() {
            Some("s") => self
                .text
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i))
                .map(|s| CellValue::Text(s.clone())),
            Some("b") => Some(CellValue::Bool(self.text.trim() == "1")),
            Some("d") => Some(match parse_iso_datetime(&self.text) {
                Some(value) => CellValue::DateTime(value),
                None => CellValue::Text(self.text),
            }),
            Some("str") | Some("inlineStr") | Some("e") => Some(CellValue::Text(self.text)),
            _ => match self.text.trim().parse::<f64>() {
                Ok(n) if styles.is_date(self.style) => Some(
                    excel_datetime(n, styles.date1904)
                        .map(CellValue::DateTime)
                        .unwrap_or(CellValue::Number(n)),
                ),
                Ok(n) => Some(CellValue::Number(n)),
                Err(_) => Some(CellValue::Text(self.text)),
            },
        }
    }
}

fn parse_sheet(
    xml: &str,
    shared_strings: &[String],
    styles: &CellStyles,
) -> Result<Vec<Row>, DatasetError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Row> = Vec::new();
    let mut current_row: Option<Row> = None;
    let mut cell: Option<PendingCell> = None;
    let mut next_column = 0usize;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    pad_rows(&mut rows, row_number(&e)?)?;
                    current_row = Some(Vec::new());
                    next_column = 0;
                }
                b"c" => {
                    let column = cell_column(&e, next_column)?;
                    next_column = column + 1;
                    cell = Some(PendingCell {
                        column,
                        cell_type: attribute(&e, b"t"),
                        style: attribute(&e, b"s").and_then(|s| s.parse().ok()),
                        text: String::new(),
                        has_value: false,
                    });
                }
                b"v" | b"t" => {
                    in_value = true;
                    if let Some(c) = cell.as_mut() {
                        c.has_value = true;
                    }
                }
                _ => (),
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                next_column = cell_column(&e, next_column)? + 1;
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                pad_rows(&mut rows, row_number(&e)?)?;
                rows.push(Vec::new());
            }
            Ok(Event::Text(e)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::CData(e)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::GeneralRef(e)) if in_value => {
                if let (Some(c), Some(ch)) =
                    (cell.as_mut(), resolve_reference(&String::from_utf8_lossy(&e)))
                {
                    c.text.push(ch);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(pending), Some(row)) = (cell.take(), current_row.as_mut()) {
                        let column = pending.column;
                        if let Some(value) = pending.resolve(shared_strings, styles) {
                            row.push((column, value));
                        }
                    }
                }
                b"row" => {
                    if let Some(row) = current_row.take() {
                        rows.push(row);
                    }
                }
                _ => (),
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(read_err(e)),
            _ => (),
        }
        buf.clear();
    }

    trim_trailing_blank_rows(&mut rows);
    Ok(rows)
}

/// Trailing blank rows carry no data
fn trim_trailing_blank_rows(rows: &mut Vec<Row>) {
    while rows.last().is_some_and(Vec::is_empty) {
        rows.pop();
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// First row is the header; remaining rows become typed columns
fn build_frame(rows: Vec<Row>) -> Result<(DataFrame, Vec<String>), DatasetError> {
    let width = rows
        .iter()
        .flat_map(|row| row.iter().map(|(column, _)| column + 1))
        .max()
        .unwrap_or(0);
    let height = rows.len().saturating_sub(1);

    if width.saturating_mul(height.max(1)) > MAX_CELLS {
        return Err(DatasetError::Read(format!(
            "worksheet spans {} rows x {} columns, more than {} cells",
            height, width, MAX_CELLS
        )));
    }

    let mut rows = rows.iter();
    let mut header_cells: Vec<Option<&CellValue>> = vec![None; width];
    if let Some(header_row) = rows.next() {
        for (column, value) in header_row {
            header_cells[*column] = Some(value);
        }
    }

    let mut grid: Vec<Vec<Option<&CellValue>>> = vec![vec![None; height]; width];
    for (index, row) in rows.enumerate() {
        for (column, value) in row {
            grid[*column][index] = Some(value);
        }
    }

    let header: Vec<String> = header_cells
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell {
            Some(value) => value.display(),
            None => format!("Unnamed: {}", i),
        })
        .collect();

    // Frame column names must be unique; repeats get a numeric suffix
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut columns: Vec<Column> = Vec::with_capacity(width);
    for (declared, cells) in header.iter().zip(&grid) {
        let count = occurrences.entry(declared.as_str()).or_insert(0);
        let name = if *count == 0 {
            declared.clone()
        } else {
            format!("{}.{}", declared, count)
        };
        *count += 1;

        columns.push(Column::from(typed_series(&name, cells)?));
    }

    let frame = DataFrame::new(columns)?;
    Ok((frame, header))
}

fn typed_series(name: &str, cells: &[Option<&CellValue>]) -> PolarsResult<Series> {
    let present = || cells.iter().flatten();
    let any_present = present().next().is_some();

    if any_present && present().all(|c| matches!(c, CellValue::Number(_))) {
        let numbers: Vec<Option<f64>> = cells
            .iter()
            .map(|c| match c {
                Some(CellValue::Number(n)) => Some(*n),
                _ => None,
            })
            .collect();

        let integral = numbers
            .iter()
            .flatten()
            .all(|n| n.fract() == 0.0 && n.abs() < 9.0e15);
        if integral {
            let ints: Vec<Option<i64>> = numbers.iter().map(|n| n.map(|v| v as i64)).collect();
            return Ok(Series::new(name.into(), ints));
        }
        return Ok(Series::new(name.into(), numbers));
    }

    if any_present && present().all(|c| matches!(c, CellValue::Bool(_))) {
        let bools: Vec<Option<bool>> = cells
            .iter()
            .map(|c| match c {
                Some(CellValue::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        return Ok(Series::new(name.into(), bools));
    }

    if any_present && present().all(|c| matches!(c, CellValue::DateTime(_))) {
        let millis: Vec<Option<i64>> = cells
            .iter()
            .map(|c| match c {
                Some(CellValue::DateTime(dt)) => Some(dt.and_utc().timestamp_millis()),
                _ => None,
            })
            .collect();
        return Series::new(name.into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None));
    }

    let strings: Vec<Option<String>> = cells.iter().map(|c| c.map(CellValue::display)).collect();
    Ok(Series::new(name.into(), strings))
}
