//! Leader election (§5 "Leader election", §9 "Global mutable state"): a
//! lease-based lock so exactly one replica per provisioner process group
//! writes to the local storage directory / upload cache at a time.
//!
//! Modeled the way the teacher leans on Kubernetes primitives rather than an
//! external distributed-lock service: a single [`k8s_openapi`]
//! `coordination.k8s.io/v1` `Lease` object is the lock. The holder renews it
//! on an interval; everyone else watches it and flips a shared
//! [`std::sync::atomic::AtomicBool`] the rest of the process reads from -
//! `rukpak-operator`'s health-probe readiness check and [`crate::storage`]'s
//! leader-aware store both key off that flag rather than re-deriving
//! leadership themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);
const FIELD_MANAGER: &str = "rukpak-leader-election";

/// Cheaply cloneable handle to the current leadership state, shared between
/// the election loop and anything in-process that needs to branch on it
/// (the storage layer, the health-probe server).
#[derive(Clone)]
pub struct LeaderState(Arc<AtomicBool>);

impl LeaderState {
    /// A fixed always-leader handle, for single-replica deployments and
    /// tests that run with `--leader-elect=false` (§6 "leader-elect").
    pub fn always_leader() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_leader(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the election loop forever: tries to acquire or renew `lease_name` in
/// `namespace` as `identity`, sleeping `RENEW_INTERVAL` between attempts.
/// Returns the [`LeaderState`] immediately; the loop itself is spawned onto
/// the current Tokio runtime.
pub fn spawn(client: Client, namespace: String, lease_name: String, identity: String) -> LeaderState {
    let state = LeaderState(Arc::new(AtomicBool::new(false)));
    let task_state = state.clone();
    tokio::spawn(async move {
        let leases: Api<Lease> = Api::namespaced(client, &namespace);
        loop {
            let acquired = try_acquire_or_renew(&leases, &lease_name, &identity).await;
            match acquired {
                Ok(leading) => {
                    if leading != task_state.is_leader() {
                        tracing::info!(leading, %identity, "leadership state changed");
                    }
                    task_state.0.store(leading, Ordering::SeqCst);
                }
                Err(error) => {
                    tracing::warn!(%error, "leader election tick failed, assuming not leader");
                    task_state.0.store(false, Ordering::SeqCst);
                }
            }
            tokio::time::sleep(RENEW_INTERVAL).await;
        }
    });
    state
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    lease_name: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = MicroTime(k8s_openapi::chrono::Utc::now());

    let existing = leases.get_opt(lease_name).await?;
    let leading = match &existing {
        None => true,
        Some(lease) => {
            let spec = lease.spec.clone().unwrap_or_default();
            let held_by_us = spec.holder_identity.as_deref() == Some(identity);
            let expired = spec
                .renew_time
                .map(|t| {
                    k8s_openapi::chrono::Utc::now() - t.0
                        > k8s_openapi::chrono::Duration::from_std(LEASE_DURATION).unwrap()
                })
                .unwrap_or(true);
            held_by_us || expired
        }
    };

    if !leading {
        return Ok(false);
    }

    let lease = Lease {
        metadata: kube::api::ObjectMeta {
            name: Some(lease_name.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
            renew_time: Some(now.clone()),
            acquire_time: Some(match &existing {
                Some(l) if l.spec.as_ref().and_then(|s| s.holder_identity.as_deref()) == Some(identity) => {
                    l.spec.as_ref().and_then(|s| s.acquire_time.clone()).unwrap_or(now)
                }
                _ => now,
            }),
            ..Default::default()
        }),
    };

    match existing {
        None => {
            leases.create(&PostParams::default(), &lease).await?;
        }
        Some(_) => {
            leases
                .patch(
                    lease_name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&lease),
                )
                .await?;
        }
    }
    Ok(true)
}
