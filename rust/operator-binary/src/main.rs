//! `rukpak-operator`: the reconciler process (§4.5, §5, §10.3). Runs the
//! Bundle and BundleDeployment controllers from `rukpak-provisioner-core`
//! behind leader election; `rukpak-storage-server` and `rukpak-upload-server`
//! are separate processes that may be colocated in the same Pod.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use rukpak_crd::{Bundle, BundleDeployment};
use rukpak_provisioner_core::config::ProvisionerConfig;
use rukpak_provisioner_core::controller::{self, Ctx};
use rukpak_provisioner_core::install::InstallContext;
use rukpak_provisioner_core::leader;
use rukpak_provisioner_core::storage::local::LocalStore;
use rukpak_provisioner_core::unpack::UnpackContext;
use rukpak_provisioner_core::upload_cache::UploadCacheHandle;

const LEASE_NAME: &str = "rukpak-operator-leader";

/// Mirrors the teacher's `Opts { common, Command<OpaRun> }` split (§10.3):
/// a `Crd` subcommand for schema introspection, a `Run` subcommand that
/// flattens the process bootstrap flags.
#[derive(Parser)]
#[command(name = "rukpak-operator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the merged CRD YAML schema for `Bundle` and `BundleDeployment`
    /// to stdout, for `kubectl apply -f -` or codegen consumption.
    Crd,
    /// Run the reconcile loops.
    Run(ProvisionerConfig),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Crd => print_crds(),
        Command::Run(config) => run(config).await,
    }
}

fn print_crds() -> anyhow::Result<()> {
    println!("{}", serde_yaml::to_string(&Bundle::crd())?);
    println!("---");
    println!("{}", serde_yaml::to_string(&BundleDeployment::crd())?);
    Ok(())
}

async fn run(config: ProvisionerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!(
        provisioner_class_name = %config.provisioner_class_name,
        "starting rukpak-operator",
    );

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
        rukpak_provisioner_core::leader::LeaderState::always_leader()
    };

    let store = Arc::new(LocalStore::new(
        config.storage_dir.clone(),
        config.http_external_address.clone(),
    ));

    let ctx = Arc::new(Ctx {
        client: client.clone(),
        provisioner_class_name: config.provisioner_class_name.clone(),
        store,
        unpack: UnpackContext {
            client: client.clone(),
            bundle_namespace: config.system_namespace.clone(),
            unpack_image: config.unpack_image.clone(),
            upload_cache: UploadCacheHandle::new(config.upload_cache_dir.clone()),
        },
        install: InstallContext {
            client: client.clone(),
            release_namespace: config.system_namespace.clone(),
        },
        leader: leader_state.clone(),
        max_concurrent_reconciles: config.max_concurrent_reconciles,
    });

    let health = tokio::spawn(serve_health_probe(
        config.health_probe_bind_address.clone(),
        leader_state,
    ));

    tokio::select! {
        () = controller::bundle::run(ctx.clone()) => {},
        () = controller::bundle_deployment::run(ctx) => {},
        result = health => { result??; },
    }

    Ok(())
}

/// `GET /healthz` always 200 (process is alive); `GET /readyz` 200 only
/// while this replica holds leadership, so a Kubernetes readiness gate can
/// be used to route traffic at whichever replica is currently leading
/// (§9 "Global mutable state").
async fn serve_health_probe(
    bind_address: String,
    leader_state: rukpak_provisioner_core::leader::LeaderState,
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
