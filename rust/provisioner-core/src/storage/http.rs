//! The HTTP serving surface mounted at `/bundles/` (§4.1, §6).
//!
//! Access control is delegated to the orchestrator: callers present a
//! bearer token, which [`TokenAuthorizer`] is expected to validate against
//! the orchestrator's token-review API and a read permission check on the
//! named Bundle. This crate only defines the trait: `rukpak-operator` wires
//! it to a real `kube` `TokenReview`/`SubjectAccessReview` client.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use super::{Store, StoreError};

#[async_trait::async_trait]
pub trait TokenAuthorizer: Send + Sync {
    /// `Ok(())` iff `token` grants read access to the named Bundle.
    async fn authorize_read(&self, bundle_name: &str, token: &str) -> Result<(), AuthError>;
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    Unauthenticated,
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingToken | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };
        status.into_response()
    }
}

#[derive(Clone)]
pub struct StorageServerState {
    pub store: Arc<dyn Store>,
    pub authorizer: Arc<dyn TokenAuthorizer>,
}

/// Mounts `GET /bundles/<name>.tgz` (§6). 404 when the archive is absent,
/// regardless of whether that's because the Bundle never unpacked or
/// because it doesn't exist - the caller's bearer token already proves they
/// know the name, so this doesn't leak anything by not distinguishing.
pub fn router(state: StorageServerState) -> Router {
    Router::new()
        .route("/bundles/{name}.tgz", get(get_bundle_archive))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn get_bundle_archive(
    State(state): State<StorageServerState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return AuthError::MissingToken.into_response();
    };
    if let Err(err) = state.authorizer.authorize_read(&name, token).await {
        return err.into_response();
    }

    match state.store.load(&name).await {
        Ok(fs) => match fs.to_tar_gz() {
            Ok(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/gzip")],
                bytes,
            )
                .into_response(),
            Err(source) => {
                tracing::error!(bundle.name = %name, error = %source, "failed to re-serialize stored bundle");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(source) => {
            tracing::error!(bundle.name = %name, error = %source, "failed to load bundle archive");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::BundleFs;
    use crate::storage::local::LocalStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct AllowAll;

    #[async_trait::async_trait]
    impl TokenAuthorizer for AllowAll {
        async fn authorize_read(&self, _bundle_name: &str, token: &str) -> Result<(), AuthError> {
            if token.is_empty() {
                Err(AuthError::Unauthenticated)
            } else {
                Ok(())
            }
        }
    }

    async fn test_state() -> (tempfile::TempDir, StorageServerState) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "https://rukpak.example");
        let mut fs = BundleFs::new();
        fs.insert("manifests/a.yaml", b"a: 1".to_vec());
        store.store("present", &fs).await.unwrap();
        (
            dir,
            StorageServerState {
                store: Arc::new(store),
                authorizer: Arc::new(AllowAll),
            },
        )
    }

    #[tokio::test]
    async fn returns_archive_when_present() {
        let (_dir, state) = test_state().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/bundles/present.tgz")
                    .header(header::AUTHORIZATION, "Bearer abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn returns_404_when_absent() {
        let (_dir, state) = test_state().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/bundles/absent.tgz")
                    .header(header::AUTHORIZATION, "Bearer abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn returns_401_without_bearer_token() {
        let (_dir, state) = test_state().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/bundles/present.tgz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
