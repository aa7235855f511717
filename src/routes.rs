//! HTTP routes.
//!
//! Endpoints:
//! - POST /powerpoint/export_as_fixed_format2/ - multipart upload (field `file`), returns the exported document
//! - GET /health - liveness and engine counters

use crate::conversion::{ConversionOutput, ConversionRequest};
use crate::error::{ErrorResponse, ErrorTranslator};
use crate::resource::ResourceStats;
use crate::service::ConversionService;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub const EXPORT_ROUTE: &str = "/powerpoint/export_as_fixed_format2/";

/// Multipart field carrying the document.
const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    service: ConversionService,
    translator: ErrorTranslator,
}

impl AppState {
    pub fn new(service: ConversionService, translator: ErrorTranslator) -> Self {
        Self {
            service,
            translator,
        }
    }

    pub fn service(&self) -> &ConversionService {
        &self.service
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(EXPORT_ROUTE, post(export_as_fixed_format))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    engine: ResourceStats,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let resources = state.service.resources();
    Json(HealthResponse {
        status: if resources.is_closed() {
            "shutting_down"
        } else {
            "healthy"
        },
        version: env!("CARGO_PKG_VERSION"),
        engine: resources.stats(),
    })
}

/// POST /powerpoint/export_as_fixed_format2/
async fn export_as_fixed_format(State(state): State<AppState>, multipart: Multipart) -> Response {
    let request = match read_upload(multipart).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match state.service.convert(request).await {
        Ok(output) => file_response(output),
        Err(e) => state.translator.respond(e),
    }
}

#[derive(Debug, thiserror::Error)]
enum UploadError {
    #[error("failed to read upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("no file provided, use multipart field '{}'", FILE_FIELD)]
    MissingFile,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            UploadError::Multipart(e) => e.status(),
            UploadError::MissingFile => StatusCode::BAD_REQUEST,
        };
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "PAYLOAD_TOO_LARGE"
        } else {
            "BAD_REQUEST"
        };
        warn!(error = %self, "Rejected upload");

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });
        (status, body).into_response()
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<ConversionRequest, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await?;
        debug!(filename = ?filename, bytes = data.len(), "Received upload");

        return Ok(ConversionRequest::new(data.to_vec(), filename));
    }

    Err(UploadError::MissingFile)
}

fn file_response(output: ConversionOutput) -> Response {
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, output.content_type)],
        output.data,
    )
        .into_response();

    if let Some(value) = output.suggested_name.as_deref().and_then(content_disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// `attachment` disposition. Names that are not plain ASCII get an
/// underscore-substituted `filename` plus the RFC 5987 `filename*` form.
pub fn content_disposition(filename: &str) -> Option<HeaderValue> {
    let fallback: String = filename
        .chars()
        .map(|c| if is_plain(c) { c } else { '_' })
        .collect();

    let value = if fallback == filename {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=utf-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    };
    HeaderValue::from_str(&value).ok()
}

fn is_plain(c: char) -> bool {
    (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_disposition() {
        let value = content_disposition("deck.pdf").unwrap();

        assert_eq!(value.to_str().unwrap(), "attachment; filename=\"deck.pdf\"");
    }

    #[test]
    fn test_encoded_disposition() {
        let value = content_disposition("präsentation.pdf").unwrap();

        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"pr_sentation.pdf\"; filename*=utf-8''pr%C3%A4sentation.pdf"
        );
        assert_eq!(
            content_disposition("say \"hi\".pdf").unwrap().to_str().unwrap(),
            "attachment; filename=\"say _hi_.pdf\"; filename*=utf-8''say%20%22hi%22.pdf"
        );
    }
}
