//! Conversion request/response models and per-request lifecycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// An uploaded document awaiting conversion.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub data: Vec<u8>,
    /// Client-supplied name; only its stem is used, for the suggested name.
    pub filename: Option<String>,
}

impl ConversionRequest {
    pub fn new(data: impl Into<Vec<u8>>, filename: Option<String>) -> Self {
        Self {
            data: data.into(),
            filename,
        }
    }
}

/// Converted document bytes plus the name to offer the client.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub data: Vec<u8>,
    pub suggested_name: Option<String>,
    pub content_type: &'static str,
}

/// `<stem>.<extension>` for the client-supplied filename, or `None` when the
/// name has no usable stem. Both `/` and `\` count as directory separators.
pub fn suggested_name(filename: Option<&str>, extension: &str) -> Option<String> {
    let base = filename?.rsplit(&['/', '\\'][..]).next()?;
    let stem = Path::new(base).file_stem()?.to_string_lossy();
    if stem.is_empty() {
        None
    } else {
        Some(format!("{}.{}", stem, extension))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Staging,
    Converting,
    Complete,
    Rejected,
    Failed,
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionStatus::Staging => write!(f, "staging"),
            ConversionStatus::Converting => write!(f, "converting"),
            ConversionStatus::Complete => write!(f, "complete"),
            ConversionStatus::Rejected => write!(f, "rejected"),
            ConversionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle of one conversion, reported to telemetry when it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub conversion_id: String,
    pub filename: Option<String>,
    pub status: ConversionStatus,
    pub input_bytes: u64,
    pub output_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ConversionRecord {
    pub fn new(filename: Option<String>, input_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            conversion_id: Uuid::new_v4().to_string(),
            filename,
            status: ConversionStatus::Staging,
            input_bytes,
            output_bytes: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn start_converting(&mut self) {
        self.status = ConversionStatus::Converting;
        self.updated_at = Utc::now();
    }

    pub fn mark_complete(&mut self, output_bytes: u64) {
        self.status = ConversionStatus::Complete;
        self.output_bytes = Some(output_bytes);
        self.updated_at = Utc::now();
        self.error = None;
    }

    pub fn mark_rejected(&mut self, error: String) {
        self.status = ConversionStatus::Rejected;
        self.updated_at = Utc::now();
        self.error = Some(error);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = ConversionStatus::Failed;
        self.updated_at = Utc::now();
        self.error = Some(error);
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            ConversionStatus::Complete | ConversionStatus::Rejected | ConversionStatus::Failed
        )
    }

    pub fn duration_ms(&self) -> Option<i64> {
        if self.is_finished() {
            Some(self.updated_at.signed_duration_since(self.created_at).num_milliseconds())
        } else {
            None
        }
    }
}
