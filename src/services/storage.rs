use crate::utils::validation::is_safe_storage_name;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File exceeds the maximum upload size of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub uploads_removed: usize,
    pub reports_removed: usize,
}

/// Persistence for uploaded datasets and generated reports.
///
/// Every name passed in must already be a sanitised, flat file name; anything
/// else is rejected with [`StorageError::InvalidName`].
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn save_upload<'a>(
        &self,
        filename: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<StoredFile>;

    /// Local path of a stored upload, `None` if it does not exist
    async fn upload_path(&self, filename: &str) -> Result<Option<PathBuf>>;

    async fn save_report(&self, report_name: &str, html: &str) -> Result<PathBuf>;
    async fn read_report(&self, report_name: &str) -> Result<Option<String>>;

    /// Removes every stored upload and report
    async fn clear(&self) -> Result<CleanupStats>;

    /// True when both folders exist and are directories
    async fn is_ready(&self) -> bool;
}

pub struct LocalStorageService {
    upload_folder: PathBuf,
    report_folder: PathBuf,
    max_file_size: usize,
}

impl LocalStorageService {
    pub fn new(upload_folder: PathBuf, report_folder: PathBuf, max_file_size: usize) -> Self {
        Self {
            upload_folder,
            report_folder,
            max_file_size,
        }
    }

    pub fn upload_folder(&self) -> &Path {
        &self.upload_folder
    }

    pub fn report_folder(&self) -> &Path {
        &self.report_folder
    }

    fn resolve(folder: &Path, name: &str) -> Result<PathBuf> {
        if is_safe_storage_name(name) {
            return Ok(folder.join(name));
        }
        tracing::warn!("Rejected storage name: {}", name);
        Err(StorageError::InvalidName(name.to_string()))
    }

    async fn clear_folder(folder: &Path) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

#[async_trait]
impl StorageService for LocalStorageService {
    async fn save_upload<'a>(
        &self,
        filename: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<StoredFile> {
        let target = Self::resolve(&self.upload_folder, filename)?;

        // Stream into a hidden part file so a failed upload never replaces a stored one
        let part = self
            .upload_folder
            .join(format!(".{}.part", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&part).await?;

        let limit = self.max_file_size as u64;
        let mut limited = reader.take(limit + 1);
        let copied = match tokio::io::copy(&mut limited, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e.into());
            }
        };
        file.flush().await?;
        drop(file);

        if copied > limit {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(StorageError::TooLarge {
                limit: self.max_file_size,
            });
        }

        tokio::fs::rename(&part, &target).await?;
        tracing::debug!("Stored {} ({} bytes)", target.display(), copied);

        Ok(StoredFile {
            filename: filename.to_string(),
            path: target,
            size: copied,
        })
    }

    async fn upload_path(&self, filename: &str) -> Result<Option<PathBuf>> {
        let path = Self::resolve(&self.upload_folder, filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_report(&self, report_name: &str, html: &str) -> Result<PathBuf> {
        let path = Self::resolve(&self.report_folder, report_name)?;
        tokio::fs::create_dir_all(&self.report_folder).await?;
        tokio::fs::write(&path, html).await?;
        Ok(path)
    }

    async fn read_report(&self, report_name: &str) -> Result<Option<String>> {
        let path = Self::resolve(&self.report_folder, report_name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Ok(Some(html)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<CleanupStats> {
        let stats = CleanupStats {
            uploads_removed: Self::clear_folder(&self.upload_folder).await?,
            reports_removed: Self::clear_folder(&self.report_folder).await?,
        };
        tracing::debug!(
            "Cleared {} uploads and {} reports",
            stats.uploads_removed,
            stats.reports_removed
        );
        Ok(stats)
    }

    async fn is_ready(&self) -> bool {
        is_dir(&self.upload_folder).await && is_dir(&self.report_folder).await
    }
}
