use crate::config::AppConfig;
use crate::services::storage::{LocalStorageService, StorageService};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Creates the upload and report folders and returns the storage backend
pub async fn setup_storage(config: &AppConfig) -> anyhow::Result<Arc<dyn StorageService>> {
    for folder in [&config.upload_folder, &config.report_folder] {
        tokio::fs::create_dir_all(folder)
            .await
            .with_context(|| format!("Failed to create folder {}", folder.display()))?;
    }

    info!(
        "📁 Storage: uploads in {}, reports in {}",
        config.upload_folder.display(),
        config.report_folder.display()
    );

    Ok(Arc::new(LocalStorageService::new(
        config.upload_folder.clone(),
        config.report_folder.clone(),
        config.max_file_size,
    )))
}
