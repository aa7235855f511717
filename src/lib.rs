//! Presentation to PDF export service library.
//!
//! Uploaded presentations are converted by a single external document engine
//! that is not safe for concurrent use. This library owns that engine and
//! serializes access to it, stages each request in its own workspace, and
//! classifies failures for the HTTP layer.
//!
//! ## Module Overview
//!
//! - `options`: export configuration and open flags
//! - `engine`: document engine capability and the LibreOffice implementation
//! - `workspace`: per-request staging directories
//! - `resource`: lazily created, exclusively leased engine handle
//! - `service`: the conversion pipeline
//! - `error`: error taxonomy and HTTP translation
//! - `routes`: axum router
//! - `config`: environment configuration
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ppt_export_server::{
//!     conversion::ConversionRequest,
//!     engine::{soffice_factory, SofficeConfig},
//!     options::ExportConfiguration,
//!     resource::ResourceManager,
//!     service::ConversionService,
//!     workspace::WorkspaceManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let resources = Arc::new(ResourceManager::new(soffice_factory(SofficeConfig::default())));
//!     let service = ConversionService::new(
//!         resources.clone(),
//!         WorkspaceManager::new("/tmp/workspaces"),
//!         ExportConfiguration::default(),
//!     );
//!
//!     let deck = std::fs::read("deck.pptx").unwrap();
//!     let output = service
//!         .convert(ConversionRequest::new(deck, Some("deck.pptx".to_string())))
//!         .await
//!         .unwrap();
//!     assert!(output.data.starts_with(b"%PDF"));
//!
//!     resources.shutdown().await;
//! }
//! ```

pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod options;
pub mod resource;
pub mod routes;
pub mod service;
pub mod telemetry;
pub mod workspace;
