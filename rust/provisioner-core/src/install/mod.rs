//! The Install Engine (C4, §4.4): reconcile a target cluster such that the
//! objects [`crate::render`] produced are present, labeled as owned by a
//! BundleDeployment, and healthy.
//!
//! The state machine is not modeled as an explicit enum walked by a
//! dispatcher; §4.4's diagram collapses into the single [`reconcile`]
//! function below, since every transition is a pure function of "is there a
//! release record" and "does the rendered manifest match it" - there's no
//! state to hold across calls beyond what [`release::ReleaseRecord`] already
//! persists in the target cluster.

pub mod apply;
pub mod probe;
pub mod release;

use kube::Client;
use rukpak_crd::condition::reason;
use rukpak_crd::probe::AvailabilityProbe;
use snafu::{ResultExt, Snafu};

use crate::render::RenderedObject;

pub const FIELD_MANAGER: &str = rukpak_crd::FIELD_MANAGER;

#[derive(Clone)]
pub struct InstallContext {
    pub client: Client,
    /// §4.4 "install-namespace is fixed to the provisioner's configured
    /// release-namespace" - one namespace per provisioner process, not
    /// derived from the BundleDeployment.
    pub release_namespace: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InstallOutcome {
    pub installed: bool,
    pub install_reason: &'static str,
    pub install_message: String,
    pub healthy: bool,
    pub healthy_reason: &'static str,
    pub healthy_message: String,
}

#[derive(Snafu, Debug)]
pub enum InstallError {
    /// Reading or writing the release record itself failed - bookkeeping
    /// around the install, not the install step §4.4 step 6 names. Kept
    /// distinct from [`InstallOutcome::installed`] so a conflict on the
    /// release secret retries via the work queue without prematurely
    /// flipping `Installed` to `False` on what may be a transient write race.
    #[snafu(display("failed to read or write release record"), context(false))]
    Release { source: release::ReleaseError },

    #[snafu(display("failed to evaluate availability probes"), context(false))]
    Probe { source: probe::ProbeError },
}

impl crate::error::ReconcilerError for InstallError {
    fn category(&self) -> &'static str {
        match self {
            InstallError::Release { .. } => "InstallFailed",
            InstallError::Probe { .. } => "Unhealthy",
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, InstallError::Release { source } if source.is_transient())
    }
}

/// Runs one reconciliation tick of §4.4's algorithm for `deployment_name`
/// against `objects`, the output of [`crate::render::render`].
///
/// §4.4 step 6 / §7 "Install"/"Unhealthy" categories: a failure in the apply
/// or orphan-sweep step (required CRD not found, apply conflict, forbidden,
/// ...) does not bubble as an [`InstallError`] - it becomes an
/// [`InstallOutcome`] with `installed: false` so the caller always has
/// something to patch onto `Installed`/`Healthy`, and the reconcile loop
/// naturally retries on its next tick. Probe evaluation failures are handled
/// the same way: the install already succeeded and is recorded, so only
/// `Healthy` needs to report the probe error. Only release-record I/O, which
/// is ambient bookkeeping around the install step rather than the step
/// itself, propagates as `Err`.
pub async fn reconcile(
    ctx: &InstallContext,
    deployment_name: &str,
    objects: Vec<RenderedObject>,
    probes: &[AvailabilityProbe],
) -> Result<InstallOutcome, InstallError> {
    let labeled: Vec<RenderedObject> = objects
        .into_iter()
        .map(|obj| apply::label_owned(obj, deployment_name))
        .collect();
    let refs = apply::object_refs(&labeled);
    let manifest_hash = apply::manifest_hash(&labeled);

    let existing = release::get_release(&ctx.client, &ctx.release_namespace, deployment_name)
        .await
        .context(ReleaseSnafu)?;

    let is_upgrade = matches!(&existing, Some(record) if record.manifest_hash != manifest_hash);
    let fail_reason = if is_upgrade {
        reason::UPGRADE_FAILED
    } else {
        reason::INSTALL_FAILED
    };

    if let Err(apply_err) = apply_all(ctx, &labeled).await {
        tracing::warn!(bundle_deployment = deployment_name, %apply_err, "install apply step failed");
        return Ok(failed_outcome(fail_reason, apply_err.to_string()));
    }

    if is_upgrade {
        // existing is `Some` whenever is_upgrade is true.
        let previous = &existing.as_ref().unwrap().objects;
        if let Err(apply_err) = sweep_orphans(ctx, previous, &refs).await {
            tracing::warn!(bundle_deployment = deployment_name, %apply_err, "install orphan sweep failed");
            return Ok(failed_outcome(fail_reason, apply_err.to_string()));
        }
    }

    let (install_message, revision) = match &existing {
        None => ("installed".to_string(), 1),
        Some(record) if is_upgrade => ("upgraded".to_string(), record.revision + 1),
        Some(record) => (
            "reconciled, no drift beyond repair".to_string(),
            record.revision,
        ),
    };

    release::put_release(
        &ctx.client,
        &ctx.release_namespace,
        deployment_name,
        &release::ReleaseRecord {
            manifest_hash,
            revision,
            status: release::ReleaseStatus::Deployed,
            objects: refs.clone(),
        },
    )
    .await
    .context(ReleaseSnafu)?;

    match probe::evaluate(&ctx.client, &ctx.release_namespace, &refs, probes).await {
        Ok(health) => Ok(InstallOutcome {
            installed: true,
            install_reason: reason::INSTALLATION_SUCCEEDED,
            install_message,
            healthy: health.healthy,
            healthy_reason: if health.healthy {
                reason::HEALTHY
            } else {
                reason::UNHEALTHY
            },
            healthy_message: health.message,
        }),
        Err(probe_err) => {
            // The install itself succeeded and is already recorded as
            // `Deployed`; only the health evaluation failed, so `Installed`
            // stays `True` while `Healthy` reports why it's unknown.
            tracing::warn!(bundle_deployment = deployment_name, %probe_err, "availability probe evaluation failed");
            Ok(InstallOutcome {
                installed: true,
                install_reason: reason::INSTALLATION_SUCCEEDED,
                install_message,
                healthy: false,
                healthy_reason: reason::UNHEALTHY,
                healthy_message: probe_err.to_string(),
            })
        }
    }
}

fn failed_outcome(reason: &'static str, message: String) -> InstallOutcome {
    InstallOutcome {
        installed: false,
        install_reason: reason,
        install_message: message,
        healthy: false,
        healthy_reason: reason::UNHEALTHY,
        healthy_message: "not evaluated: install failed".to_string(),
    }
}

async fn apply_all(ctx: &InstallContext, objects: &[RenderedObject]) -> Result<(), apply::ApplyError> {
    for object in objects {
        apply::apply_object(&ctx.client, &ctx.release_namespace, object).await?;
    }
    Ok(())
}

async fn sweep_orphans(
    ctx: &InstallContext,
    previous: &[release::ObjectRef],
    current: &[release::ObjectRef],
) -> Result<(), apply::ApplyError> {
    for object_ref in previous {
        if !current.contains(object_ref) {
            apply::delete_object(&ctx.client, &ctx.release_namespace, object_ref).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_is_never_reported_healthy() {
        let outcome = failed_outcome(reason::INSTALL_FAILED, "boom".to_string());
        assert!(!outcome.installed);
        assert!(!outcome.healthy);
        assert_eq!(outcome.install_reason, reason::INSTALL_FAILED);
        assert_eq!(outcome.install_message, "boom");
    }
}
