//! HTTP handler functions for the crash map API.

use actix_web::http::header;
use actix_web::{HttpResponse, web};
use crash_map_filter::validate_filter;
use crash_map_server_models::{
    ApiError, ApiHealth, ApiValidationError, CACHE_CONTROL_VALUE, TRUNCATED_HEADER,
    feature_collection, raw_filter_from_pairs,
};
use crash_map_source::{SourceError, query_features};

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: state.source.id().to_string(),
    })
}

/// `GET /api/crashes`
///
/// Validates the viewport filter, runs one remote query, and returns the
/// normalized features as a `FeatureCollection`.
pub async fn crashes(
    state: web::Data<AppState>,
    params: web::Query<Vec<(String, String)>>,
) -> HttpResponse {
    let raw = raw_filter_from_pairs(&params);

    let filter = match validate_filter(&raw) {
        Ok(filter) => filter,
        Err(e) => {
            log::warn!("Rejected crash query: {e}");
            return HttpResponse::BadRequest().json(ApiValidationError::from(e.issues));
        }
    };

    match query_features(state.source.as_ref(), &filter).await {
        Ok(result) => HttpResponse::Ok()
            .insert_header((TRUNCATED_HEADER, result.truncated.to_string()))
            .insert_header((header::CACHE_CONTROL, CACHE_CONTROL_VALUE))
            .json(feature_collection(result.features)),
        Err(e) => error_response(&e),
    }
}

/// Maps a query failure to a status code and JSON error body.
fn error_response(err: &SourceError) -> HttpResponse {
    match err {
        SourceError::Usage { message } => {
            log::warn!("Unusable crash query: {message}");
            HttpResponse::BadRequest().json(ApiError::new(message.clone()))
        }
        SourceError::Configuration { .. } | SourceError::Definition(_) | SourceError::Io(_) => {
            log::error!("Crash query misconfigured: {err}");
            HttpResponse::InternalServerError().json(ApiError::new(err.to_string()))
        }
        SourceError::Upstream { body, .. } | SourceError::MalformedResponse { body, .. } => {
            log::error!("Failed to query crashes: {err} (body: {body:?})");
            HttpResponse::BadGateway().json(ApiError::new(err.to_string()))
        }
        SourceError::Http(_) => {
            log::error!("Failed to query crashes: {err}");
            HttpResponse::BadGateway().json(ApiError::new(err.to_string()))
        }
    }
}
