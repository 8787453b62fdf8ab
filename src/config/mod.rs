use std::env;
use std::path::PathBuf;

/// Runtime configuration for the validation service
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Folder holding uploaded datasets (default: "uploads")
    pub upload_folder: PathBuf,

    /// Folder receiving generated reports (default: "reports")
    pub report_folder: PathBuf,

    /// Maximum upload size in bytes (default: 100 MB)
    pub max_file_size: usize,

    /// Remove previous uploads and reports before accepting a new upload (default: true)
    pub clean_on_upload: bool,

    /// Allowed CORS Origins (comma separated, "*" for any)
    pub allowed_origins: Vec<String>,

    /// Expectation suite tuning
    pub suite: SuiteConfig,
}

/// Thresholds used by the expectation suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteConfig {
    /// Columns with fewer distinct values than this get a value-set expectation (default: 30)
    pub categorical_threshold: usize,

    /// Longest string accepted by the length expectation (default: 255)
    pub max_string_length: usize,

    /// Number of distinct values listed in a value-set result (default: 5)
    pub sample_size: usize,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            categorical_threshold: 30,
            max_string_length: 255,
            sample_size: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_folder: PathBuf::from("uploads"),
            report_folder: PathBuf::from("reports"),
            max_file_size: 100 * 1024 * 1024, // 100 MB
            clean_on_upload: true,
            allowed_origins: vec![
                "http://localhost:5000".to_string(),
                "http://127.0.0.1:5000".to_string(),
            ],
            suite: SuiteConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_folder: env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.upload_folder),

            report_folder: env::var("REPORT_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.report_folder),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            clean_on_upload: env::var("CLEAN_ON_UPLOAD")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.clean_on_upload),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),

            suite: SuiteConfig {
                categorical_threshold: env::var("CATEGORICAL_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.suite.categorical_threshold),
                max_string_length: env::var("MAX_STRING_LENGTH")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.suite.max_string_length),
                sample_size: default.suite.sample_size,
            },
        }
    }

    /// Config rooted in the given folders, used by tests and local tooling
    pub fn with_folders(upload_folder: impl Into<PathBuf>, report_folder: impl Into<PathBuf>) -> Self {
        Self {
            upload_folder: upload_folder.into(),
            report_folder: report_folder.into(),
            ..Self::default()
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}
