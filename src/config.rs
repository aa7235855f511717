//! Service configuration.
//!
//! Environment variables (a `.env` file is honoured by the binary):
//! - `BIND_ADDR`: listen address (default: 0.0.0.0:8000)
//! - `WORKSPACE_ROOT`: parent of per-request workspaces (default: ./workspaces)
//! - `MAX_UPLOAD_BYTES`: request body limit (default: 100 MiB)
//! - `ACQUIRE_TIMEOUT_SECS`: wait limit for the engine, 0 disables (default: 120)
//! - `SESSION_TIMEOUT_SECS`: open/export/close limit, 0 disables (default: 300)
//! - `STAGING_EXTENSION`: extension of staged input files (default: pptx)
//! - `REJECTION_POLICY`: `distinguish` or `collapse` (default: distinguish)
//! - `SOFFICE_PATH`: LibreOffice executable (default: soffice)
//! - `SOFFICE_EXPORT_TIMEOUT_SECS`: per-export process limit (default: 240)
//! - `EXPORT_CONFIG`: optional JSON file with export settings

use crate::engine::SofficeConfig;
use crate::error::RejectionPolicy;
use crate::options::{ExportConfiguration, OptionsError};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SOFFICE_EXPORT_TIMEOUT_SECS: u64 = 240;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read export configuration {path}: {source}")]
    ReadExportConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse export configuration {path}: {source}")]
    ParseExportConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid export configuration: {0}")]
    InvalidExportConfig(#[from] OptionsError),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub workspace_root: PathBuf,
    pub max_upload_bytes: usize,
    pub acquire_timeout: Option<Duration>,
    pub session_timeout: Option<Duration>,
    pub staging_extension: String,
    pub rejection_policy: RejectionPolicy,
    pub soffice: SofficeConfig,
    pub export: ExportConfiguration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            workspace_root: PathBuf::from("workspaces"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            acquire_timeout: Some(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)),
            session_timeout: Some(Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS)),
            staging_extension: "pptx".to_string(),
            rejection_policy: RejectionPolicy::Distinguish,
            soffice: SofficeConfig::default(),
            export: ExportConfiguration::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR.to_string())?;
        let workspace_root = lookup("WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("workspaces"));
        let max_upload_bytes = parse(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES.to_string())?;
        let acquire_timeout = timeout(&lookup, "ACQUIRE_TIMEOUT_SECS", DEFAULT_ACQUIRE_TIMEOUT_SECS)?;
        let session_timeout = timeout(&lookup, "SESSION_TIMEOUT_SECS", DEFAULT_SESSION_TIMEOUT_SECS)?;

        let staging_extension = lookup("STAGING_EXTENSION")
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .unwrap_or_else(|| "pptx".to_string());
        if staging_extension.is_empty()
            || !staging_extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidValue {
                key: "STAGING_EXTENSION",
                value: staging_extension,
                reason: "expected a short alphanumeric extension".to_string(),
            });
        }

        let rejection_policy = parse(&lookup, "REJECTION_POLICY", "distinguish".to_string())?;

        let soffice = SofficeConfig {
            program: lookup("SOFFICE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("soffice")),
            export_timeout: Duration::from_secs(parse(
                &lookup,
                "SOFFICE_EXPORT_TIMEOUT_SECS",
                DEFAULT_SOFFICE_EXPORT_TIMEOUT_SECS.to_string(),
            )?),
        };

        let export = match lookup("EXPORT_CONFIG") {
            Some(path) => load_export_configuration(Path::new(&path))?,
            None => ExportConfiguration::default(),
        };

        Ok(Self {
            bind_addr,
            workspace_root,
            max_upload_bytes,
            acquire_timeout,
            session_timeout,
            staging_extension,
            rejection_policy,
            soffice,
            export,
        })
    }
}

/// Reads and validates an export configuration JSON file. Missing fields
/// take their defaults.
pub fn load_export_configuration(path: &Path) -> Result<ExportConfiguration, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadExportConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ExportConfiguration =
        serde_json::from_str(&raw).map_err(|source| ConfigError::ParseExportConfig {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

fn parse<F, T>(lookup: &F, key: &'static str, default: String) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = lookup(key).unwrap_or(default);
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

/// Seconds, where 0 disables the timeout.
fn timeout<F>(lookup: &F, key: &'static str, default: u64) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse(lookup, key, default.to_string())?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
