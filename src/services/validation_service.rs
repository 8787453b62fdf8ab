use crate::config::SuiteConfig;
use crate::services::dataset::{DatasetError, DatasetInfo, load_dataset};
use crate::services::expectations::{ExpectationResult, ExpectationSuite};
use crate::services::report::{ValidationSummary, render_report, report_file_name};
use crate::services::storage::{StorageError, StorageService};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ValidationFailure {
    #[error("File {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Error rendering report")]
    Render(#[from] std::fmt::Error),

    #[error("Validation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Everything produced by one validation run
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub dataset: DatasetInfo,
    pub summary: ValidationSummary,
    pub results: Vec<ExpectationResult>,
    pub report_name: String,
    pub report_html: String,
}

pub struct ValidationService {
    storage: Arc<dyn StorageService>,
    suite: ExpectationSuite,
}

impl ValidationService {
    pub fn new(storage: Arc<dyn StorageService>, suite: SuiteConfig) -> Self {
        Self {
            storage,
            suite: ExpectationSuite::new(suite),
        }
    }

    /// Loads a stored upload, runs the suite, renders the report and stores it
    pub async fn validate(&self, filename: &str) -> Result<ValidationOutcome, ValidationFailure> {
        let path = match self.storage.upload_path(filename).await {
            Ok(Some(path)) => path,
            Ok(None) | Err(StorageError::InvalidName(_)) => {
                return Err(ValidationFailure::NotFound(filename.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let suite = self.suite.clone();
        let (dataset, results, report_html) = tokio::task::spawn_blocking(move || {
            let dataset = load_dataset(&path)?;
            let results = suite.evaluate(&dataset)?;
            let info = dataset.info();
            let html = render_report(&info, &results, chrono::Local::now().naive_local())?;
            Ok::<_, ValidationFailure>((info, results, html))
        })
        .await??;

        let report_name = report_file_name(&dataset.file_name);
        self.storage.save_report(&report_name, &report_html).await?;

        let summary = ValidationSummary::from_results(&results);
        info!(
            "✅ Validated {}: {}/{} expectations passed",
            dataset.file_name, summary.passed, summary.total
        );

        Ok(ValidationOutcome {
            dataset,
            summary,
            results,
            report_name,
            report_html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::LocalStorageService;

    async fn service() -> (tempfile::TempDir, Arc<LocalStorageService>, ValidationService) {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let reports = dir.path().join("reports");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&reports).unwrap();

        let storage = Arc::new(LocalStorageService::new(uploads, reports, 1024 * 1024));
        let service = ValidationService::new(storage.clone(), SuiteConfig::default());
        (dir, storage, service)
    }

    #[tokio::test]
    async fn test_validate_writes_report() {
        let (_dir, storage, service) = service().await;
        let data: &[u8] = b"id,city\n1,Paris\n2,Rome\n";
        storage.save_upload("cities.csv", Box::new(data)).await.unwrap();

        let outcome = service.validate("cities.csv").await.unwrap();
        assert_eq!(outcome.dataset.rows, 2);
        assert_eq!(outcome.report_name, "cities.csv_report.html");
        assert_eq!(outcome.summary.total, outcome.results.len());
        assert_eq!(outcome.summary.failed, 0);

        let stored = storage.read_report("cities.csv_report.html").await.unwrap();
        assert_eq!(stored.as_deref(), Some(outcome.report_html.as_str()));
    }

    #[tokio::test]
    async fn test_missing_and_unsafe_names_are_not_found() {
        let (_dir, _storage, service) = service().await;

        for name in ["absent.csv", "../etc/passwd"] {
            let err = service.validate(name).await.unwrap_err();
            assert!(matches!(err, ValidationFailure::NotFound(_)), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_unreadable_dataset_is_dataset_error() {
        let (_dir, storage, service) = service().await;
        let data: &[u8] = b"{ not json";
        storage.save_upload("broken.json", Box::new(data)).await.unwrap();

        let err = service.validate("broken.json").await.unwrap_err();
        assert!(matches!(err, ValidationFailure::Dataset(_)));
        assert!(err.to_string().starts_with("Error reading file"));
    }
}
