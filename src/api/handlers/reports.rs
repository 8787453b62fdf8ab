use crate::utils::html::{encode_path_segment, not_found_page};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

pub fn report_url(report_name: &str) -> String {
    format!("/reports/{}", encode_path_segment(report_name))
}

/// Serves a previously generated report without re-running validation
pub async fn get_report(
    State(state): State<crate::AppState>,
    Path(report_name): Path<String>,
) -> Response {
    match state.storage.read_report(&report_name).await {
        Ok(Some(html)) => Html(html).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Html(not_found_page(&report_name))).into_response(),
        Err(e) => {
            tracing::warn!("Report lookup for {} failed: {}", report_name, e);
            (StatusCode::NOT_FOUND, Html(not_found_page(&report_name))).into_response()
        }
    }
}
