use crate::api::error::AppError;
use crate::services::dataset::DatasetFormat;
use crate::utils::html::encode_path_segment;
use crate::utils::validation::{
    ALLOWED_EXTENSIONS, file_extension, sanitize_filename, validate_extension, verify_content,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use futures::TryStreamExt;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Form field carrying the dataset
const DATASET_FIELD: &str = "dataset";

/// Multipart form accepted by `/upload`
#[derive(ToSchema)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub dataset: Vec<u8>,
}

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub status: String,
    pub message: String,
    /// Page that validates the stored file
    pub redirect: String,
}

pub fn validate_url(filename: &str) -> String {
    format!("/validate/{}", encode_path_segment(filename))
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Missing file or unsupported type", body = crate::api::error::ErrorResponse),
        (status = 413, description = "File too large", body = crate::api::error::ErrorResponse)
    ),
    tag = "datasets"
)]
pub async fn upload_dataset(
    State(state): State<crate::AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|e| {
        tracing::debug!("Rejected upload body: {}", e);
        AppError::BadRequest("No file part".to_string())
    })?;

    if state.config.clean_on_upload {
        match state.storage.clear().await {
            Ok(stats) => tracing::info!(
                "🧹 Cleared {} uploads and {} reports",
                stats.uploads_removed,
                stats.reports_removed
            ),
            Err(e) => tracing::warn!("Failed to clear storage folders: {}", e),
        }
    }

    let result: Result<Json<UploadResponse>, AppError> = async {
        let mut stored = None;

        while let Some(field) = multipart.next_field().await.map_err(|e| {
            let err_msg = e.to_string();
            if err_msg.contains("length limit exceeded") {
                AppError::PayloadTooLarge(
                    "Request body exceeds the maximum allowed limit".to_string(),
                )
            } else {
                AppError::BadRequest(err_msg)
            }
        })? {
            if field.name() != Some(DATASET_FIELD) {
                continue;
            }

            let original_filename = field.file_name().unwrap_or_default().to_string();
            if original_filename.is_empty() {
                return Err(AppError::BadRequest("No file selected".to_string()));
            }

            // 1. Extension of the name the client sent
            validate_extension(&original_filename)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;

            // 2. Flatten it to something safe to store
            let filename = sanitize_filename(&original_filename)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            let format = file_extension(&filename)
                .and_then(|ext| DatasetFormat::from_extension(&ext))
                .ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "Invalid file type. Allowed: {}",
                        ALLOWED_EXTENSIONS.join(", ")
                    ))
                })?;

            // 3. Peek at the leading bytes before anything touches the disk
            let body_with_io_error = field.map_err(std::io::Error::other);
            let mut reader = StreamReader::new(body_with_io_error);
            let mut header_buffer = [0u8; 1024];
            let n = reader
                .read(&mut header_buffer)
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
            let header = &header_buffer[..n];
            verify_content(header, format).map_err(|e| AppError::BadRequest(e.to_string()))?;

            // 4. Stream the rest into storage
            let chained_reader = std::io::Cursor::new(header.to_vec()).chain(reader);
            let file = state
                .storage
                .save_upload(&filename, Box::new(chained_reader))
                .await?;

            tracing::info!(
                "📥 Stored upload {} ({} bytes, {})",
                file.filename,
                file.size,
                format.label()
            );
            stored = Some(file);
            break;
        }

        let file = stored.ok_or(AppError::BadRequest("No file part".to_string()))?;

        Ok(Json(UploadResponse {
            status: "success".to_string(),
            message: "File uploaded successfully".to_string(),
            redirect: validate_url(&file.filename),
        }))
    }
    .await;

    match result {
        Ok(res) => Ok(res),
        Err(e) => {
            // Drain the body so the client sees the JSON error instead of a reset connection
            tracing::warn!("Upload rejected: {}. Consuming remaining stream...", e);
            while let Ok(Some(mut field)) = multipart.next_field().await {
                while let Ok(Some(_)) = field.chunk().await {}
            }
            Err(e)
        }
    }
}
