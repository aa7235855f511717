/// End-to-end tests for the HTTP surface.
///
/// The axum router is driven in-process with `tower::ServiceExt::oneshot`,
/// backed by the instrumented fake engine from `common`.
mod common;

#[cfg(test)]
mod tests {
    use super::common::{fake_factory, fake_service, residue, Tally, MINIMAL_DECK};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use ppt_export_server::engine::EngineError;
    use ppt_export_server::error::{ErrorTranslator, RejectionPolicy};
    use ppt_export_server::options::ExportConfiguration;
    use ppt_export_server::resource::ResourceManager;
    use ppt_export_server::routes::{router, AppState, EXPORT_ROUTE};
    use ppt_export_server::service::ConversionService;
    use ppt_export_server::workspace::WorkspaceManager;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----export-test-boundary";
    const BODY_LIMIT: usize = 1024 * 1024;

    fn app(root: &TempDir, tally: Arc<Tally>, policy: RejectionPolicy) -> Router {
        let state = AppState::new(fake_service(root, tally), ErrorTranslator::new(policy));
        router(state, BODY_LIMIT)
    }

    fn upload(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Body> {
        let disposition = match filename {
            Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
            None => format!("form-data; name=\"{}\"", field),
        };

        let mut body = format!(
            "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, disposition
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri(EXPORT_ROUTE)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Uploading a valid deck returns the PDF with a filename hint.
    #[tokio::test]
    async fn test_upload_valid_deck() {
        let root = TempDir::new().unwrap();
        let app = app(&root, Arc::new(Tally::default()), RejectionPolicy::Distinguish);

        let response = app
            .oneshot(upload("file", Some("deck.src"), MINIMAL_DECK))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"deck.pdf\""
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"%PDF"));
        assert_eq!(residue(&root), 0);
    }

    /// A zero-byte upload is unprocessable and leaves nothing on disk.
    #[tokio::test]
    async fn test_upload_empty_file() {
        let root = TempDir::new().unwrap();
        let app = app(&root, Arc::new(Tally::default()), RejectionPolicy::Distinguish);

        let response = app
            .oneshot(upload("file", Some("bad.src"), b""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["code"], "INPUT_REJECTED");
        assert_eq!(residue(&root), 0);
    }

    /// With the collapse policy every failure is a server error.
    #[tokio::test]
    async fn test_collapse_policy() {
        let root = TempDir::new().unwrap();
        let app = app(&root, Arc::new(Tally::default()), RejectionPolicy::Collapse);

        let response = app
            .oneshot(upload("file", Some("bad.src"), b""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(residue(&root), 0);
    }

    /// No filename means no disposition header.
    #[tokio::test]
    async fn test_upload_without_filename() {
        let root = TempDir::new().unwrap();
        let app = app(&root, Arc::new(Tally::default()), RejectionPolicy::Distinguish);

        let response = app
            .oneshot(upload("file", None, MINIMAL_DECK))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    }

    /// Requests without a `file` field are bad requests.
    #[tokio::test]
    async fn test_missing_file_field() {
        let root = TempDir::new().unwrap();
        let tally = Arc::new(Tally::default());
        let app = app(&root, tally.clone(), RejectionPolicy::Distinguish);

        let response = app
            .oneshot(upload("document", Some("deck.pptx"), MINIMAL_DECK))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "BAD_REQUEST");
        assert_eq!(Tally::get(&tally.launches), 0);
    }

    /// Bodies over the configured limit are refused before any conversion.
    #[tokio::test]
    async fn test_oversize_upload() {
        let root = TempDir::new().unwrap();
        let tally = Arc::new(Tally::default());
        let app = app(&root, tally.clone(), RejectionPolicy::Distinguish);
        let oversize = vec![0u8; BODY_LIMIT + 64 * 1024];

        let response = app
            .oneshot(upload("file", Some("huge.pptx"), &oversize))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(response).await["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(Tally::get(&tally.launches), 0);
        assert_eq!(residue(&root), 0);
    }

    /// Engine launch failure surfaces as a server error.
    #[tokio::test]
    async fn test_engine_unavailable() {
        let root = TempDir::new().unwrap();
        let service = ConversionService::new(
            Arc::new(ResourceManager::new(Arc::new(|| {
                Err(EngineError::Launch("soffice not installed".to_string()))
            }))),
            WorkspaceManager::new(root.path()),
            ExportConfiguration::default(),
        );
        let app = router(AppState::new(service, ErrorTranslator::default()), BODY_LIMIT);

        let response = app
            .oneshot(upload("file", Some("deck.pptx"), MINIMAL_DECK))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["code"], "RESOURCE_UNAVAILABLE");
        assert_eq!(residue(&root), 0);
    }

    /// Health reports engine counters.
    #[tokio::test]
    async fn test_health() {
        let root = TempDir::new().unwrap();
        let tally = Arc::new(Tally::default());
        let state = AppState::new(
            ConversionService::new(
                Arc::new(ResourceManager::new(fake_factory(tally))),
                WorkspaceManager::new(root.path()),
                ExportConfiguration::default(),
            ),
            ErrorTranslator::default(),
        );
        let app = router(state.clone(), BODY_LIMIT);

        let response = app
            .clone()
            .oneshot(upload("file", Some("deck.pptx"), MINIMAL_DECK))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["engine"]["created"], 1);
        assert_eq!(body["engine"]["active"], 0);
        assert_eq!(body["engine"]["running"], true);

        state.service().resources().shutdown().await;
    }
}
