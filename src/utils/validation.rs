use anyhow::{Result, anyhow};

use crate::services::dataset::DatasetFormat;
use crate::services::report::REPORT_SUFFIX;

/// Extensions accepted by the upload endpoint, kept sorted for error messages
pub const ALLOWED_EXTENSIONS: &[&str] = &["csv", "json", "xls", "xlsx"];

/// Longest name the storage folders accept
const MAX_STORED_NAME_LEN: usize = 255;

/// Longest upload name; leaves room for the report suffix
const MAX_FILENAME_LEN: usize = MAX_STORED_NAME_LEN - REPORT_SUFFIX.len();

/// OLE compound document signature (legacy .xls)
const OLE_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// ZIP local file header (.xlsx)
const ZIP_SIGNATURE: &[u8] = &[0x50, 0x4B, 0x03, 0x04];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Lower-cased extension after the last dot, if any
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

pub fn allowed_file(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Rejects names whose extension is not a supported dataset format
pub fn validate_extension(filename: &str) -> Result<()> {
    if allowed_file(filename) {
        return Ok(());
    }

    Err(anyhow!(ValidationError {
        code: "INVALID_FILE_TYPE",
        message: format!(
            "Invalid file type. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ),
    }))
}

/// Reduces a client supplied name to a flat ASCII file name.
///
/// Path separators become whitespace, whitespace runs become a single `_`,
/// anything outside `[A-Za-z0-9_.-]` is dropped and leading or trailing
/// `.`/`_` are trimmed, so `../../etc/passwd` ends up as `etc_passwd`.
/// Overlong names lose the end of their stem, never their extension.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized = shorten_stem(flatten_filename(filename), MAX_FILENAME_LEN);

    if sanitized.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename is empty after sanitisation".to_string(),
        }));
    }

    Ok(sanitized)
}

/// True when `name` can be used as-is inside a storage folder
pub fn is_safe_storage_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_STORED_NAME_LEN && flatten_filename(name) == name
}

fn flatten_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let stripped: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    stripped.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Cuts an ASCII name down to `limit` bytes, keeping the extension
fn shorten_stem(mut name: String, limit: usize) -> String {
    if name.len() <= limit {
        return name;
    }

    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot < limit => {
            let extension = name.split_off(dot);
            name.truncate(limit - extension.len());
            let stem = name.trim_end_matches(['.', '_', '-']);
            format!("{}{}", stem, extension)
        }
        _ => {
            name.truncate(limit);
            name.trim_end_matches(['.', '_']).to_string()
        }
    }
}

/// Checks if file content appears to be executable
pub fn is_executable_content(header: &[u8]) -> bool {
    if header.len() < 4 {
        return false;
    }

    // ELF, PE/COFF, Mach-O and shebang scripts
    header.starts_with(&[0x7F, 0x45, 0x4C, 0x46])
        || header.starts_with(&[0x4D, 0x5A])
        || header.starts_with(&[0xFE, 0xED, 0xFA, 0xCE])
        || header.starts_with(&[0xFE, 0xED, 0xFA, 0xCF])
        || header.starts_with(&[0xCE, 0xFA, 0xED, 0xFE])
        || header.starts_with(&[0xCF, 0xFA, 0xED, 0xFE])
        || header.starts_with(b"#!")
}

/// Checks the leading bytes of an upload against the format its extension claims
pub fn verify_content(header: &[u8], format: DatasetFormat) -> Result<()> {
    if is_executable_content(header) {
        return Err(anyhow!(ValidationError {
            code: "EXECUTABLE_CONTENT",
            message: "File contains executable content which is not allowed".to_string(),
        }));
    }

    if header.is_empty() {
        // Empty files are stored and reported on by the loader
        return Ok(());
    }

    match format {
        DatasetFormat::Csv | DatasetFormat::Json => {
            if header.iter().take(512).any(|&b| b == 0) {
                return Err(anyhow!(ValidationError {
                    code: "BINARY_AS_TEXT",
                    message: format!(
                        "File claimed as {} but contains binary content",
                        format.label()
                    ),
                }));
            }
        }
        DatasetFormat::Xlsx => {
            if !header.starts_with(ZIP_SIGNATURE) {
                return Err(anyhow!(ValidationError {
                    code: "CONTENT_MISMATCH",
                    message: "File claimed as XLSX but is not an Office Open XML workbook"
                        .to_string(),
                }));
            }
        }
        DatasetFormat::Xls => {
            let detected = infer::get(header).map(|k| k.mime_type());
            if !header.starts_with(OLE_SIGNATURE) && detected != Some("application/vnd.ms-excel")
            {
                return Err(anyhow!(ValidationError {
                    code: "CONTENT_MISMATCH",
                    message: "File claimed as XLS but is not an Excel workbook".to_string(),
                }));
            }
        }
    }

    Ok(())
}
