//! Conversion error taxonomy and its translation to HTTP responses.

use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ConvertError {
    /// Filesystem I/O while preparing or reading workspace files.
    #[error("staging failed: {context}: {source}")]
    Staging {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine could not be created or acquired.
    #[error("document engine unavailable: {0}")]
    ResourceUnavailable(String),

    /// The engine refused to open the document.
    #[error("document could not be opened: {0}")]
    InputRejected(#[source] EngineError),

    /// The document opened but the engine failed to produce output.
    #[error("export failed: {0}")]
    ExportFailed(#[source] EngineError),
}

impl ConvertError {
    pub fn staging(context: impl Into<String>, source: std::io::Error) -> Self {
        ConvertError::Staging {
            context: context.into(),
            source,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::Staging { .. } => "STAGING_ERROR",
            ConvertError::ResourceUnavailable(_) => "RESOURCE_UNAVAILABLE",
            ConvertError::InputRejected(_) => "INPUT_REJECTED",
            ConvertError::ExportFailed(_) => "EXPORT_FAILED",
        }
    }
}

/// Whether engine open failures are reported as client errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// `InputRejected` maps to 422 Unprocessable Entity.
    #[default]
    Distinguish,
    /// Every failure is a server error.
    Collapse,
}

impl FromStr for RejectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "distinguish" => Ok(RejectionPolicy::Distinguish),
            "collapse" => Ok(RejectionPolicy::Collapse),
            other => Err(format!(
                "unknown rejection policy '{}', expected 'distinguish' or 'collapse'",
                other
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Maps conversion failures to caller-visible responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator {
    policy: RejectionPolicy,
}

impl ErrorTranslator {
    pub fn new(policy: RejectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RejectionPolicy {
        self.policy
    }

    pub fn status_for(&self, err: &ConvertError) -> StatusCode {
        match (err, self.policy) {
            (ConvertError::InputRejected(_), RejectionPolicy::Distinguish) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn respond(&self, err: ConvertError) -> Response {
        let status = self.status_for(&err);
        if status.is_client_error() {
            warn!(code = err.code(), error = %err, "Conversion rejected");
        } else {
            error!(code = err.code(), error = %err, "Conversion failed");
        }

        let body = Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        });
        (status, body).into_response()
    }
}
