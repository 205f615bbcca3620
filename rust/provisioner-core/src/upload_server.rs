//! The Upload Ingestion HTTP surface (C6, §4.6): `PUT /uploads/<name>`
//! accepts a tar.gz body and replaces the upload cache entry for that
//! Bundle name, after checking the caller's bearer token against an
//! `update` permission on the named Bundle.
//!
//! Mirrors [`crate::storage::http`]'s shape (bearer-token extraction,
//! [`TokenAuthorizer`]-gated handler, `tower`-testable router) since both are
//! the same "authenticated content endpoint" pattern applied to a different
//! verb and a different backing store.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::Router;

use crate::leader::LeaderState;
use crate::storage::http::{AuthError, TokenAuthorizer};
use crate::upload_cache::{UploadCacheError, UploadCacheHandle};

#[derive(Clone)]
pub struct UploadServerState {
    pub cache: UploadCacheHandle,
    pub authorizer: Arc<dyn TokenAuthorizer>,
    /// The upload cache is process-local (§9 "Global mutable state"); only
    /// the leader's cache is the one the unpacker will ever read back, so a
    /// non-leader replica rejects writes rather than silently accepting
    /// uploads nobody will see.
    pub leader: LeaderState,
}

pub fn router(state: UploadServerState) -> Router {
    Router::new()
        .route("/uploads/{name}", put(put_upload))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn put_upload(
    State(state): State<UploadServerState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !state.leader.is_leader() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(token) = bearer_token(&headers) else {
        return AuthError::MissingToken.into_response();
    };
    if let Err(err) = state.authorizer.authorize_read(&name, token).await {
        return err.into_response();
    }

    match state.cache.put(&name, &body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(source) => {
            tracing::error!(bundle.name = %name, error = %source, "failed to persist uploaded archive");
            upload_cache_status(&source).into_response()
        }
    }
}

fn upload_cache_status(error: &UploadCacheError) -> StatusCode {
    match error {
        UploadCacheError::NotFound { .. } => StatusCode::NOT_FOUND,
        UploadCacheError::Io { .. } | UploadCacheError::Decode { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    async fn test_state() -> (tempfile::TempDir, UploadServerState) {
        let dir = tempfile::tempdir().unwrap();
        let cache = UploadCacheHandle::new(dir.path());
        (
            dir,
            UploadServerState {
                cache,
                authorizer: Arc::new(AllowAll),
                leader: crate::leader::LeaderState::always_leader(),
            },
        )
    }

    #[tokio::test]
    async fn put_upload_replaces_cache_entry() {
        let (_dir, state) = test_state().await;
        let mut fs = crate::fs::BundleFs::new();
        fs.insert("manifests/a.yaml", b"a: 1".to_vec());
        let archive = fs.to_tar_gz().unwrap();

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/uploads/my-bundle")
                    .header(header::AUTHORIZATION, "Bearer abc")
                    .body(Body::from(archive))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let loaded = state.cache.get("my-bundle").await.unwrap();
        assert_eq!(loaded, fs);
    }

    #[tokio::test]
    async fn put_upload_requires_bearer_token() {
        let (_dir, state) = test_state().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/uploads/my-bundle")
                    .body(Body::from(Vec::new()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
