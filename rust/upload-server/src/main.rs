//! `rukpak-upload-server`: the Upload Ingestion (C6, §4.6) HTTP surface.
//! Accepts `PUT /uploads/<name>` and persists the archive to a process-local
//! cache that the operator's unpacker reads back from, either directly (when
//! colocated) or via `base-upload-manager-url` (§9 "base-upload-manager-url").
//! Runs its own leader election, since unlike `rukpak-storage-server` it has
//! no inherent reason to be colocated with `rukpak-operator`.

use std::sync::Arc;

use clap::Parser;
use rukpak_provisioner_core::config::ProvisionerConfig;
use rukpak_provisioner_core::leader;
use rukpak_provisioner_core::storage::auth::KubeTokenAuthorizer;
use rukpak_provisioner_core::upload_cache::UploadCacheHandle;
use rukpak_provisioner_core::upload_server::{self, UploadServerState};

const LEASE_NAME: &str = "rukpak-upload-server-leader";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ProvisionerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let client = kube::Client::try_default().await?;
    let identity = std::env::var("POD_NAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    let leader_state = if config.leader_elect {
        leader::spawn(
            client.clone(),
            config.system_namespace.clone(),
            LEASE_NAME.to_string(),
            identity,
        )
    } else {
        leader::LeaderState::always_leader()
    };

    let state = UploadServerState {
        cache: UploadCacheHandle::new(config.upload_cache_dir.clone()),
        authorizer: Arc::new(KubeTokenAuthorizer::updater(client)),
        leader: leader_state.clone(),
    };

    let health = tokio::spawn(serve_health_probe(
        config.health_probe_bind_address.clone(),
        leader_state,
    ));

    let router = upload_server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_bind_address).await?;
    tracing::info!(address = %config.http_bind_address, "rukpak-upload-server listening");

    tokio::select! {
        result = axum::serve(listener, router.into_make_service()) => { result?; },
        result = health => { result??; },
    }

    Ok(())
}

/// Same shape as the operator binary's probe (§9 "Global mutable state"):
/// `/readyz` gates traffic to whichever replica currently holds the lease.
async fn serve_health_probe(
    bind_address: String,
    leader_state: leader::LeaderState,
) -> anyhow::Result<()> {
    use axum::routing::get;
    use axum::{http::StatusCode, Router};

    let app = Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route(
            "/readyz",
            get(move || {
                let leader_state = leader_state.clone();
                async move {
                    if leader_state.is_leader() {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }
            }),
        );
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
