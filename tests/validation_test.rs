use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use data_validation_backend::config::AppConfig;
use data_validation_backend::infrastructure::storage::setup_storage;
use data_validation_backend::{AppState, create_app};
use http_body_util::BodyExt;
use serde_json::Value;
use std::io::Write;
use tower::ServiceExt;
use zip::write::FileOptions;

const BOUNDARY: &str = "XVALIDATIONBOUNDARY";

async fn setup() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::with_folders(dir.path().join("uploads"), dir.path().join("reports"));
    let storage = setup_storage(&config).await.unwrap();
    (dir, create_app(AppState::new(storage, config)))
}

async fn upload(app: &Router, filename: &str, content: &[u8]) -> String {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"dataset\"; filename=\"{filename}\"\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status, StatusCode::OK, "upload failed: {}", json);
    json["redirect"].as_str().unwrap().to_string()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_str(&body).unwrap())
}

fn find<'a>(results: &'a [Value], column: Option<&str>, kind: &str) -> &'a Value {
    results
        .iter()
        .find(|r| r["column"].as_str() == column && r["expectation_type"] == kind)
        .unwrap_or_else(|| panic!("missing {} for {:?}", kind, column))
}

#[tokio::test]
async fn test_missing_file_returns_not_found_page() {
    let (_dir, app) = setup().await;

    let (status, html) = get(&app, "/validate/nothing.csv").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(html.contains("File Not Found"));
    assert!(html.contains("nothing.csv"));
    assert!(html.contains("Please upload the file again."));

    let (status, json) = get_json(&app, "/api/validate/nothing.csv").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_malformed_dataset_returns_error_page() {
    let (_dir, app) = setup().await;
    let redirect = upload(&app, "broken.json", br#"[{"a": 1}, {"a": "#).await;

    let (status, html) = get(&app, &redirect).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(html.contains("Validation Error"));
    assert!(html.contains("An error occurred during validation:"));
    assert!(html.contains("Error reading file"));

    let (status, json) = get_json(&app, "/api/validate/broken.json").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_header_only_csv_fails_row_count() {
    let (_dir, app) = setup().await;
    upload(&app, "empty.csv", b"a,b\n").await;

    let (status, json) = get_json(&app, "/api/validate/empty.csv").await;
    assert_eq!(status, StatusCode::OK);

    let results = json["results"].as_array().unwrap();
    let row_count = find(results, None, "expect_table_row_count_to_be_greater_than");
    assert_eq!(row_count["success"], false);
    assert_eq!(row_count["result"]["observed_value"], 0);
    assert_eq!(json["summary"]["failed"], 1);
}

#[tokio::test]
async fn test_json_results_for_csv() {
    let (_dir, app) = setup().await;
    let csv = "id,score,city\n1,2.5,Paris\n2,3.5,Rome\n3,,Paris\n4,4.0,Oslo\n";
    upload(&app, "scores.csv", csv.as_bytes()).await;

    let (status, json) = get_json(&app, "/api/validate/scores.csv").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["report_url"], "/reports/scores.csv_report.html");

    assert_eq!(json["dataset"]["file_name"], "scores.csv");
    assert_eq!(json["dataset"]["format"], "csv");
    assert_eq!(json["dataset"]["rows"], 4);
    assert_eq!(json["dataset"]["columns"], 3);
    assert_eq!(json["dataset"]["size_bytes"], csv.len());

    let results = json["results"].as_array().unwrap();
    let summary = &json["summary"];
    assert_eq!(summary["total"], results.len());
    let passed = results.iter().filter(|r| r["success"] == true).count();
    assert_eq!(summary["passed"], passed);

    // Global expectations come first
    assert!(results[..3].iter().all(|r| r["column"].is_null()));

    let id_unique = find(results, Some("id"), "expect_column_values_to_be_unique");
    assert_eq!(id_unique["result"]["unique_count"], 4);

    let score_nulls = find(results, Some("score"), "expect_column_values_to_not_be_null");
    assert_eq!(score_nulls["success"], false);
    assert_eq!(score_nulls["result"]["missing_percent"], 25.0);

    let score_range = find(results, Some("score"), "expect_column_values_to_be_between");
    assert_eq!(score_range["result"]["observed_value"], "min: 2.5, max: 4.0");

    let cities = find(results, Some("city"), "expect_column_values_to_be_in_set");
    assert_eq!(cities["result"]["observed_value"], "3 unique values");
    assert_eq!(
        cities["result"]["partial_unexpected_list"],
        serde_json::json!(["Paris", "Rome", "Oslo"])
    );

    // Report was stored alongside
    let (status, html) = get(&app, "/reports/scores.csv_report.html").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("(4/4 passed)"), "city passes every check");
}

#[tokio::test]
async fn test_csv_dates_are_checked_as_strings() {
    let (_dir, app) = setup().await;
    let csv = "order_date,total\n2024-01-05,10\n2024-01-06,12\n2024-01-07,9\n";
    upload(&app, "orders.csv", csv.as_bytes()).await;

    let (status, json) = get_json(&app, "/api/validate/orders.csv").await;
    assert_eq!(status, StatusCode::OK);

    let results = json["results"].as_array().unwrap();
    let dtype = find(results, Some("order_date"), "expect_column_values_to_be_in_type_list");
    assert_eq!(dtype["result"]["observed_value"], "string/object");
    let lengths = find(results, Some("order_date"), "expect_column_value_lengths_to_be_between");
    assert_eq!(lengths["result"]["observed_value"], "min: 10, max: 10");
    let unique = find(results, Some("order_date"), "expect_column_values_to_be_unique");
    assert_eq!(unique["result"]["unique_count"], 3);
}

#[tokio::test]
async fn test_long_file_name_can_be_validated() {
    let (_dir, app) = setup().await;
    let name = format!("{}.csv", "q".repeat(300));
    let redirect = upload(&app, &name, b"id\n1\n2\n").await;

    let stored = redirect.trim_start_matches("/validate/");
    assert_eq!(stored.len(), 243);
    assert!(stored.ends_with(".csv"));

    let (status, json) = get_json(&app, &format!("/api/validate/{}", stored)).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(
        json["report_url"].as_str().unwrap().len(),
        "/reports/".len() + 255
    );

    let (status, html) = get(&app, &redirect).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Data Validation Report"));
}

#[tokio::test]
async fn test_json_records_dataset() {
    let (_dir, app) = setup().await;
    let records = br#"[{"sku": "A1", "in_stock": true}, {"sku": "B2", "in_stock": false}]"#;
    upload(&app, "stock.json", records).await;

    let (status, json) = get_json(&app, "/api/validate/stock.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["dataset"]["format"], "json");

    let results = json["results"].as_array().unwrap();
    let in_stock = find(results, Some("in_stock"), "expect_column_values_to_be_in_type_list");
    assert_eq!(in_stock["result"]["observed_value"], "bool");
    let in_stock_mean = find(results, Some("in_stock"), "expect_column_mean_to_be_between");
    assert_eq!(in_stock_mean["result"]["observed_value"], 0.5);
    let sku = find(results, Some("sku"), "expect_column_value_lengths_to_be_between");
    assert_eq!(sku["result"]["observed_value"], "min: 2, max: 2");
}

#[tokio::test]
async fn test_xlsx_dataset() {
    let (_dir, app) = setup().await;

    let entries = [
        (
            "xl/workbook.xml",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Data" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#,
        ),
        (
            "xl/sharedStrings.xml",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><si><t>region</t></si><si><t>sales</t></si><si><t>north</t></si><si><t>south</t></si></sst>"#,
        ),
        (
            "xl/styles.xml",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"/></cellXfs></styleSheet>"#,
        ),
        (
            "xl/worksheets/sheet1.xml",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="inlineStr"><is><t>shipped</t></is></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>10</v></c><c r="C2" s="1"><v>45000</v></c></row>
<row r="3"><c r="A3" t="s"><v>3</v></c><c r="B3"><v>30</v></c><c r="C3" s="1"><v>45031</v></c></row>
</sheetData></worksheet>"#,
        ),
    ];

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(name, FileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    let workbook = writer.finish().unwrap().into_inner();

    upload(&app, "sales.xlsx", &workbook).await;

    let (status, json) = get_json(&app, "/api/validate/sales.xlsx").await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["dataset"]["format"], "xlsx");
    assert_eq!(json["dataset"]["rows"], 2);

    let results = json["results"].as_array().unwrap();
    let sales = find(results, Some("sales"), "expect_column_mean_to_be_between");
    assert_eq!(sales["result"]["observed_value"], 20.0);

    // Date-formatted cells are dates, not serial numbers
    let shipped = find(results, Some("shipped"), "expect_column_values_to_be_in_type_list");
    assert_eq!(shipped["result"]["observed_value"], "datetime");
    let shipped_checks: Vec<&str> = results
        .iter()
        .filter(|r| r["column"] == "shipped")
        .map(|r| r["expectation_type"].as_str().unwrap())
        .collect();
    assert!(!shipped_checks.contains(&"expect_column_values_to_be_between"));

    let (status, html) = get(&app, "/validate/sales.xlsx").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains(r#"<div class="info-value">XLSX</div>"#));
}

enum Cell {
    Text(&'static str),
    Number(f64),
}

fn biff_record(out: &mut Vec<u8>, kind: u16, data: &[u8]) {
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
}

fn biff_bof(substream: u16) -> Vec<u8> {
    let mut data = Vec::new();
    for field in [0x0600u16, substream, 0x0DBB, 0x07CC] {
        data.extend_from_slice(&field.to_le_bytes());
    }
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&6u32.to_le_bytes());
    data
}

/// A one-sheet BIFF8 workbook inside a minimal compound file: header, one
/// FAT sector, one directory sector, then the `Workbook` stream padded to
/// the 4096 bytes that keep it out of the mini stream
fn legacy_workbook(rows: &[Vec<Cell>]) -> Vec<u8> {
    const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
    const FREE: u32 = 0xFFFF_FFFF;
    const STREAM_LEN: usize = 4096;

    let mut strings: Vec<&str> = Vec::new();
    for cell in rows.iter().flatten() {
        if let Cell::Text(s) = cell
            && !strings.contains(s)
        {
            strings.push(*s);
        }
    }

    let mut stream = Vec::new();
    biff_record(&mut stream, 0x0809, &biff_bof(0x0005));
    biff_record(&mut stream, 0x0042, &1200u16.to_le_bytes());
    let sheet_offset_at = stream.len() + 4;
    biff_record(&mut stream, 0x0085, &[0, 0, 0, 0, 0, 0, 4, 0, b'D', b'a', b't', b'a']);
    let mut sst = Vec::new();
    sst.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    sst.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    for s in &strings {
        sst.extend_from_slice(&(s.len() as u16).to_le_bytes());
        sst.push(0);
        sst.extend_from_slice(s.as_bytes());
    }
    biff_record(&mut stream, 0x00FC, &sst);
    biff_record(&mut stream, 0x000A, &[]);

    let sheet_offset = (stream.len() as u32).to_le_bytes();
    stream[sheet_offset_at..sheet_offset_at + 4].copy_from_slice(&sheet_offset);
    biff_record(&mut stream, 0x0809, &biff_bof(0x0010));
    for (row, cells) in rows.iter().enumerate() {
        for (column, cell) in cells.iter().enumerate() {
            let mut data = Vec::new();
            data.extend_from_slice(&(row as u16).to_le_bytes());
            data.extend_from_slice(&(column as u16).to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
            match cell {
                Cell::Text(s) => {
                    let index = strings.iter().position(|t| t == s).unwrap() as u32;
                    data.extend_from_slice(&index.to_le_bytes());
                    biff_record(&mut stream, 0x00FD, &data);
                }
                Cell::Number(n) => {
                    data.extend_from_slice(&n.to_le_bytes());
                    biff_record(&mut stream, 0x0203, &data);
                }
            }
        }
    }
    biff_record(&mut stream, 0x000A, &[]);
    assert!(stream.len() <= STREAM_LEN);
    stream.resize(STREAM_LEN, 0);

    let mut file = vec![0u8; 512];
    file[..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    for (offset, value) in [(24, 0x003Eu16), (26, 3), (28, 0xFFFE), (30, 9), (32, 6)] {
        file[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
    let header_fields = [
        (44, 1u32),       // FAT sectors
        (48, 1),          // first directory sector
        (56, 0x1000),     // mini stream cutoff
        (60, END_OF_CHAIN),
        (68, END_OF_CHAIN),
        (76, 0),          // DIFAT[0]: the FAT lives in sector 0
    ];
    for (offset, value) in header_fields {
        file[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
    for slot in 1..109 {
        let offset = 76 + slot * 4;
        file[offset..offset + 4].copy_from_slice(&FREE.to_le_bytes());
    }

    let stream_sectors = STREAM_LEN / 512;
    let mut fat = vec![FREE; 128];
    fat[0] = 0xFFFF_FFFD;
    fat[1] = END_OF_CHAIN;
    for sector in 2..2 + stream_sectors {
        fat[sector] = if sector == 1 + stream_sectors {
            END_OF_CHAIN
        } else {
            sector as u32 + 1
        };
    }
    for entry in fat {
        file.extend_from_slice(&entry.to_le_bytes());
    }

    let directory_entry = |name: &str, kind: u8, child: u32, start: u32, size: u32| {
        let mut entry = vec![0u8; 128];
        let encoded: Vec<u8> = name
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(u16::to_le_bytes)
            .collect();
        let encoded_len = if name.is_empty() { 0 } else { encoded.len() };
        entry[..encoded_len].copy_from_slice(&encoded[..encoded_len]);
        entry[64..66].copy_from_slice(&(encoded_len as u16).to_le_bytes());
        entry[66] = kind;
        entry[67] = 1;
        entry[68..72].copy_from_slice(&FREE.to_le_bytes());
        entry[72..76].copy_from_slice(&FREE.to_le_bytes());
        entry[76..80].copy_from_slice(&child.to_le_bytes());
        entry[116..120].copy_from_slice(&start.to_le_bytes());
        entry[120..124].copy_from_slice(&size.to_le_bytes());
        entry
    };
    file.extend(directory_entry("Root Entry", 5, 1, END_OF_CHAIN, 0));
    file.extend(directory_entry("Workbook", 2, FREE, 2, STREAM_LEN as u32));
    file.extend(directory_entry("", 0, FREE, 0, 0));
    file.extend(directory_entry("", 0, FREE, 0, 0));

    file.extend(stream);
    file
}

#[tokio::test]
async fn test_xls_dataset() {
    let (_dir, app) = setup().await;
    let workbook = legacy_workbook(&[
        vec![Cell::Text("region"), Cell::Text("units")],
        vec![Cell::Text("north"), Cell::Number(10.0)],
        vec![Cell::Text("south"), Cell::Number(30.0)],
        vec![Cell::Text("east"), Cell::Number(20.0)],
    ]);
    let redirect = upload(&app, "regions.xls", &workbook).await;

    let (status, json) = get_json(&app, "/api/validate/regions.xls").await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["dataset"]["format"], "xls");
    assert_eq!(json["dataset"]["rows"], 3);
    assert_eq!(json["dataset"]["columns"], 2);

    let results = json["results"].as_array().unwrap();
    let columns = find(results, None, "expect_table_columns_to_match_set");
    assert_eq!(columns["result"]["observed_value"], serde_json::json!(["region", "units"]));
    let units = find(results, Some("units"), "expect_column_values_to_be_in_type_list");
    assert_eq!(units["result"]["observed_value"], "int64");
    let mean = find(results, Some("units"), "expect_column_mean_to_be_between");
    assert_eq!(mean["result"]["observed_value"], 20.0);
    let region = find(results, Some("region"), "expect_column_values_to_be_in_type_list");
    assert_eq!(region["result"]["observed_value"], "string/object");

    let (status, html) = get(&app, &redirect).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains(r#"<div class="info-value">XLS</div>"#));
}

#[tokio::test]
async fn test_unreadable_xls_is_reported_as_validation_error() {
    let (_dir, app) = setup().await;
    let ole = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0, 0, 0];
    let redirect = upload(&app, "broken.xls", &ole).await;

    let (status, html) = get(&app, &redirect).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(html.contains("not a valid xls workbook"));
}
