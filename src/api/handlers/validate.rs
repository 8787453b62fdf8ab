use crate::api::error::AppError;
use crate::services::dataset::DatasetInfo;
use crate::services::expectations::ExpectationResult;
use crate::services::report::ValidationSummary;
use crate::services::validation_service::ValidationFailure;
use crate::utils::html::{not_found_page, validation_error_page};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct ValidationResponse {
    pub status: String,
    pub dataset: DatasetInfo,
    pub summary: ValidationSummary,
    pub results: Vec<ExpectationResult>,
    /// Where the rendered HTML report can be fetched
    pub report_url: String,
}

/// Browser route: validates the stored upload and returns the report page
pub async fn validate_page(
    State(state): State<crate::AppState>,
    Path(filename): Path<String>,
) -> Response {
    match state.validation_service.validate(&filename).await {
        Ok(outcome) => Html(outcome.report_html).into_response(),
        Err(ValidationFailure::NotFound(_)) => {
            tracing::warn!("Validation requested for missing file {}", filename);
            (StatusCode::NOT_FOUND, Html(not_found_page(&filename))).into_response()
        }
        Err(e) => {
            tracing::error!("❌ Validation of {} failed: {}", filename, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(validation_error_page(&e.to_string())),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/validate/{filename}",
    params(
        ("filename" = String, Path, description = "Stored upload name as returned in the upload redirect")
    ),
    responses(
        (status = 200, description = "Validation results", body = ValidationResponse),
        (status = 404, description = "File not found", body = crate::api::error::ErrorResponse),
        (status = 422, description = "File could not be read as a dataset", body = crate::api::error::ErrorResponse)
    ),
    tag = "datasets"
)]
pub async fn validate_json(
    State(state): State<crate::AppState>,
    Path(filename): Path<String>,
) -> Result<Json<ValidationResponse>, AppError> {
    let outcome = state.validation_service.validate(&filename).await?;

    Ok(Json(ValidationResponse {
        status: "success".to_string(),
        dataset: outcome.dataset,
        summary: outcome.summary,
        report_url: super::reports::report_url(&outcome.report_name),
        results: outcome.results,
    }))
}
