pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::storage::StorageService;
use crate::services::validation_service::ValidationService;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_dataset,
        api::handlers::validate::validate_json,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::error::ErrorResponse,
            api::handlers::upload::UploadForm,
            api::handlers::upload::UploadResponse,
            api::handlers::validate::ValidationResponse,
            api::handlers::health::HealthResponse,
            services::dataset::DatasetInfo,
            services::dataset::DatasetFormat,
            services::report::ValidationSummary,
            services::expectations::ExpectationResult,
            services::expectations::ExpectationType,
        )
    ),
    tags(
        (name = "datasets", description = "Dataset upload and validation"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageService>,
    pub validation_service: Arc<ValidationService>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(storage: Arc<dyn StorageService>, config: AppConfig) -> Self {
        let validation_service = Arc::new(ValidationService::new(storage.clone(), config.suite));
        Self {
            storage,
            validation_service,
            config,
        }
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = if config.allows_any_origin() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(api::handlers::index::index))
        .route("/upload", post(api::handlers::upload::upload_dataset))
        .route(
            "/validate/:filename",
            get(api::handlers::validate::validate_page),
        )
        .route(
            "/api/validate/:filename",
            get(api::handlers::validate::validate_json),
        )
        .route("/reports/:name", get(api::handlers::reports::get_report))
        .route("/health", get(api::handlers::health::health_check))
        .layer(from_fn(api::middleware::security::security_headers));

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config))
        .layer(DefaultBodyLimit::max(
            state.config.max_file_size + MULTIPART_OVERHEAD,
        ))
        .with_state(state)
}
