//! `rukpak-storage-server`: the Content Storage (C1, §4.1) HTTP surface.
//! Deployed as a sidecar alongside `rukpak-operator` sharing its `POD_NAME`
//! identity, so the two agree on leadership via the same `Lease` object
//! (§9 "Global mutable state"): while leading, bundle archives are served
//! straight off local disk; otherwise requests are proxied to whichever
//! replica currently holds the lease, over HTTPS with the configured CA.

use std::sync::Arc;

use clap::Parser;
use rukpak_provisioner_core::config::ProvisionerConfig;
use rukpak_provisioner_core::leader;
use rukpak_provisioner_core::storage::auth::KubeTokenAuthorizer;
use rukpak_provisioner_core::storage::http::{self, StorageServerState};
use rukpak_provisioner_core::storage::leader_aware::LeaderAwareStore;
use rukpak_provisioner_core::storage::local::LocalStore;
use rukpak_provisioner_core::storage::remote::RemoteLoader;
use rukpak_provisioner_core::storage::Store;

const LEASE_NAME: &str = "rukpak-operator-leader";

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

    let local = LocalStore::new(
        config.storage_dir.clone(),
        config.http_external_address.clone(),
    );

    let peer_token = read_own_service_account_token().unwrap_or_default();
    let peer_client = build_reqwest_client(config.bundle_ca_file.as_deref())?;
    let remote = RemoteLoader::new(
        peer_client,
        format!("https://rukpak-storage-server.{}.svc", config.system_namespace),
        peer_token,
    );

    let store: Arc<dyn Store> = Arc::new(LeaderAwareStore::new(leader_state, local, remote));
    let authorizer = Arc::new(KubeTokenAuthorizer::reader(client));

    let router = http::router(StorageServerState { store, authorizer });
    let listener = tokio::net::TcpListener::bind(&config.http_bind_address).await?;
    tracing::info!(address = %config.http_bind_address, "rukpak-storage-server listening");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}

fn build_reqwest_client(ca_file: Option<&std::path::Path>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(path) = ca_file {
        let pem = std::fs::read(path)?;
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
    }
    Ok(builder.build()?)
}

fn read_own_service_account_token() -> Option<String> {
    std::fs::read_to_string("/var/run/secrets/kubernetes.io/serviceaccount/token").ok()
}
