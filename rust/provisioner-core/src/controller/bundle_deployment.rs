//! The BundleDeployment controller (C5, §4.5): computes the desired child
//! [`Bundle`] from a template hash, then once that Bundle is `Unpacked`,
//! drives it through [`crate::render`] and [`crate::install`], and sweeps
//! stale sibling Bundles once the new one is `Installed=True`.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use k8s_openapi::chrono::Utc;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use rukpak_crd::condition::{bundle_deployment_condition, reason, ConditionStatus};
use rukpak_crd::fingerprint;
use rukpak_crd::{Bundle, BundleDeployment, BundleDeploymentStatus, BundlePhase, BundleSpec, GROUP};
use snafu::{OptionExt, ResultExt, Snafu};

use super::{requeue_pending, requeue_transient, Ctx};
use crate::error::ReconcilerError;
use crate::install::{self, InstallError};
use crate::render::{RenderError, RenderVariant};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read or create child bundle {name:?}"))]
    ChildBundle { name: String, source: kube::Error },

    #[snafu(display("unknown provisioner class name {class:?}"))]
    UnknownProvisionerClass { class: String },

    #[snafu(display("failed to render bundle {name:?}"))]
    Render { name: String, source: RenderError },

    #[snafu(display("failed to install bundle deployment {name:?}"))]
    Install { name: String, source: InstallError },

    #[snafu(display("failed to load archive for bundle {name:?}"))]
    LoadArchive {
        name: String,
        source: crate::storage::StoreError,
    },

    #[snafu(display("failed to patch status for bundle deployment {name:?}"))]
    PatchStatus { name: String, source: kube::Error },

    #[snafu(display("failed to sweep stale sibling bundles of {name:?}"))]
    Sweep { name: String, source: kube::Error },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        match self {
            Error::ChildBundle { .. }
            | Error::UnknownProvisionerClass { .. }
            | Error::LoadArchive { .. } => reason::BUNDLE_LOAD_FAILED,
            Error::Render { .. } | Error::Install { .. } => reason::INSTALL_FAILED,
            Error::PatchStatus { .. } | Error::Sweep { .. } => reason::RECONCILE_FAILED,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            Error::Install { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Runs the BundleDeployment controller to completion; one per provisioner
/// process, watching both BundleDeployments and the Bundles they own.
pub async fn run(ctx: Arc<Ctx>) {
    let concurrency = ctx.max_concurrent_reconciles;
    let deployments: Api<BundleDeployment> = Api::all(ctx.client.clone());
    let bundles: Api<Bundle> = Api::all(ctx.client.clone());
    Controller::new(deployments, watcher::Config::default())
        .owns(bundles, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each_concurrent(concurrency, |result| async move {
            match result {
                Ok((object_ref, _)) => {
                    tracing::debug!(bundle_deployment = %object_ref.name, "reconciled")
                }
                Err(error) => tracing::warn!(%error, "bundle deployment reconcile failed"),
            }
        })
        .await;
}

fn error_policy(_bd: Arc<BundleDeployment>, error: &Error, _ctx: Arc<Ctx>) -> Action {
    tracing::warn!(%error, "bundle deployment reconcile error, requeuing");
    if error.is_transient() {
        requeue_transient()
    } else {
        requeue_pending()
    }
}

async fn reconcile(bd: Arc<BundleDeployment>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    if bd.spec.provisioner_class_name != ctx.provisioner_class_name {
        return Ok(Action::await_change());
    }
    if !ctx.leader.is_leader() {
        return Ok(requeue_transient());
    }

    let deployment_name = bd.name_any();
    let bundles: Api<Bundle> = Api::all(ctx.client.clone());
    let deployments: Api<BundleDeployment> = Api::all(ctx.client.clone());

    let desired_name = fingerprint::bundle_name(&deployment_name, &bd.spec.template);
    let child = ensure_child_bundle(&bundles, &bd, &desired_name)
        .await
        .with_context(|_| ChildBundleSnafu {
            name: desired_name.clone(),
        })?;

    let mut status = bd.status.clone().unwrap_or_default();
    status.observed_generation = bd.metadata.generation;

    let now = || Time(Utc::now());

    match bundle_condition_for(&child) {
        BundleReadiness::Pending(message) => {
            set_condition(
                &mut status,
                bundle_deployment_condition::HAS_VALID_BUNDLE,
                ConditionStatus::Unknown,
                reason::UNPACK_PENDING,
                message,
                bd.metadata.generation,
                now(),
            );
            patch_status(&deployments, &deployment_name, &status).await?;
            return Ok(requeue_pending());
        }
        BundleReadiness::Failing(message) => {
            set_condition(
                &mut status,
                bundle_deployment_condition::HAS_VALID_BUNDLE,
                ConditionStatus::False,
                reason::UNPACK_FAILED,
                message,
                bd.metadata.generation,
                now(),
            );
            patch_status(&deployments, &deployment_name, &status).await?;
            // Pivot-to-broken-version scenario (§8 scenario 7): the prior
            // `activeBundle`, if any, is left untouched - only a successful
            // new Bundle ever replaces it.
            return Ok(Action::await_change());
        }
        BundleReadiness::Ready => {
            set_condition(
                &mut status,
                bundle_deployment_condition::HAS_VALID_BUNDLE,
                ConditionStatus::True,
                reason::INSTALLATION_SUCCEEDED,
                "bundle unpacked successfully",
                bd.metadata.generation,
                now(),
            );
        }
    }

    let variant = match RenderVariant::from_provisioner_class(&bd.spec.provisioner_class_name)
        .context(UnknownProvisionerClassSnafu {
            class: bd.spec.provisioner_class_name.clone(),
        }) {
        Ok(variant) => variant,
        Err(error) => return fail_before_install(&deployments, &bd, &mut status, error).await,
    };

    let fs = match ctx.store.load(&desired_name).await.with_context(|_| LoadArchiveSnafu {
        name: desired_name.clone(),
    }) {
        Ok(fs) => fs,
        Err(error) => return fail_before_install(&deployments, &bd, &mut status, error).await,
    };

    let objects = match crate::render::render(&variant, &fs, bd.spec.config.as_ref())
        .with_context(|_| RenderSnafu {
            name: desired_name.clone(),
        }) {
        Ok(objects) => objects,
        Err(error) => return fail_before_install(&deployments, &bd, &mut status, error).await,
    };

    let probes = bd.spec.availability_probes.clone().unwrap_or_default();
    let outcome = install::reconcile(&ctx.install, &deployment_name, objects, &probes)
        .await
        .with_context(|_| InstallSnafu {
            name: deployment_name.clone(),
        })?;

    status.active_bundle = Some(desired_name.clone());
    set_condition(
        &mut status,
        bundle_deployment_condition::INSTALLED,
        ConditionStatus::from(outcome.installed),
        outcome.install_reason,
        outcome.install_message.clone(),
        bd.metadata.generation,
        now(),
    );
    set_condition(
        &mut status,
        bundle_deployment_condition::HEALTHY,
        ConditionStatus::from(outcome.healthy),
        outcome.healthy_reason,
        outcome.healthy_message.clone(),
        bd.metadata.generation,
        now(),
    );

    patch_status(&deployments, &deployment_name, &status).await?;

    if outcome.installed {
        // §4.5 "after Installed=True, deletes all sibling Bundles with
        // stale hashes" / §8 invariant 5 & scenario 6(c).
        sweep_stale_siblings(&bundles, &bd, &desired_name)
            .await
            .with_context(|_| SweepSnafu {
                name: deployment_name.clone(),
            })?;
    }

    Ok(requeue_pending())
}

/// §7 "BundleLoadFailed"/"InstallFailed" categories: a failure choosing the
/// render variant, loading the archive, or rendering it happens before
/// [`install::reconcile`] ever runs, so there's no [`install::InstallOutcome`]
/// to report - `Installed` is set `False` directly from the error instead of
/// bubbling past the status patch the way a bare `?` would.
async fn fail_before_install(
    deployments: &Api<BundleDeployment>,
    bd: &BundleDeployment,
    status: &mut BundleDeploymentStatus,
    error: Error,
) -> Result<Action, Error> {
    set_condition(
        status,
        bundle_deployment_condition::INSTALLED,
        ConditionStatus::False,
        error.category(),
        error.to_string(),
        bd.metadata.generation,
        Time(Utc::now()),
    );
    patch_status(deployments, &bd.name_any(), status).await?;
    Ok(requeue_pending())
}

enum BundleReadiness {
    Pending(String),
    Failing(String),
    Ready,
}

fn bundle_condition_for(bundle: &Bundle) -> BundleReadiness {
    let Some(status) = &bundle.status else {
        return BundleReadiness::Pending("bundle status not yet observed".to_string());
    };
    match status.phase {
        BundlePhase::Pending | BundlePhase::Unpacking => {
            BundleReadiness::Pending(format!("bundle {} is unpacking", bundle.name_any()))
        }
        BundlePhase::Failing => {
            let message = status
                .conditions
                .iter()
                .find(|c| c.type_ == rukpak_crd::condition::bundle_condition::UNPACKED)
                .map(|c| c.message.clone())
                .unwrap_or_else(|| "bundle unpack failed".to_string());
            BundleReadiness::Failing(message)
        }
        BundlePhase::Unpacked => BundleReadiness::Ready,
    }
}

async fn ensure_child_bundle(
    bundles: &Api<Bundle>,
    bd: &BundleDeployment,
    desired_name: &str,
) -> Result<Bundle, kube::Error> {
    if let Some(existing) = bundles.get_opt(desired_name).await? {
        return Ok(existing);
    }

    let mut bundle = Bundle::new(
        desired_name,
        BundleSpec {
            provisioner_class_name: bd.spec.template.spec.provisioner_class_name.clone(),
            source: bd.spec.template.spec.source.clone(),
        },
    );
    bundle.meta_mut().labels = bd.spec.template.metadata.labels.clone();
    bundle.meta_mut().annotations = bd.spec.template.metadata.annotations.clone();
    bundle.meta_mut().owner_references = Some(vec![owner_reference(bd)]);

    bundles.create(&PostParams::default(), &bundle).await
}

/// Deletes every Bundle owned by `bd` other than `keep_name`, once `keep_name`
/// has reached `Installed=True` (§3 "Lifecycle", §8 invariant 5 / scenario 6).
async fn sweep_stale_siblings(
    bundles: &Api<Bundle>,
    bd: &BundleDeployment,
    keep_name: &str,
) -> Result<(), kube::Error> {
    let owner_uid = bd.uid();
    let all = bundles.list(&ListParams::default()).await?;
    for sibling in all {
        if sibling.name_any() == keep_name {
            continue;
        }
        let owned_by_this = sibling
            .meta()
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| Some(&r.uid) == owner_uid.as_ref()));
        if owned_by_this {
            bundles.delete(&sibling.name_any(), &Default::default()).await?;
        }
    }
    Ok(())
}

fn owner_reference(bd: &BundleDeployment) -> OwnerReference {
    OwnerReference {
        api_version: format!("{GROUP}/v1alpha1"),
        kind: "BundleDeployment".to_string(),
        name: bd.name_any(),
        uid: bd.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn set_condition(
    status: &mut BundleDeploymentStatus,
    type_: &str,
    condition_status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
    now: Time,
) {
    rukpak_crd::condition::set_condition(
        &mut status.conditions,
        type_,
        condition_status,
        reason,
        message,
        observed_generation,
        now,
    );
}

async fn patch_status(
    api: &Api<BundleDeployment>,
    name: &str,
    status: &BundleDeploymentStatus,
) -> Result<(), Error> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .with_context(|_| PatchStatusSnafu {
            name: name.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rukpak_crd::source::{BundleSource, UploadSource};
    use rukpak_crd::BundleStatus;

    fn bundle_with_phase(phase: BundlePhase) -> Bundle {
        let mut bundle = Bundle::new(
            "child",
            BundleSpec {
                provisioner_class_name: "core.rukpak.io/plain".into(),
                source: BundleSource::Upload(UploadSource {}),
            },
        );
        bundle.status = Some(BundleStatus {
            phase,
            ..Default::default()
        });
        bundle
    }

    #[test]
    fn pending_phase_yields_pending_readiness() {
        assert!(matches!(
            bundle_condition_for(&bundle_with_phase(BundlePhase::Pending)),
            BundleReadiness::Pending(_)
        ));
    }

    #[test]
    fn unpacked_phase_yields_ready() {
        assert!(matches!(
            bundle_condition_for(&bundle_with_phase(BundlePhase::Unpacked)),
            BundleReadiness::Ready
        ));
    }

    #[test]
    fn failing_phase_yields_failing_readiness() {
        assert!(matches!(
            bundle_condition_for(&bundle_with_phase(BundlePhase::Failing)),
            BundleReadiness::Failing(_)
        ));
    }

    #[test]
    fn missing_status_yields_pending_readiness() {
        let bundle = Bundle::new(
            "child",
            BundleSpec {
                provisioner_class_name: "core.rukpak.io/plain".into(),
                source: BundleSource::Upload(UploadSource {}),
            },
        );
        assert!(matches!(
            bundle_condition_for(&bundle),
            BundleReadiness::Pending(_)
        ));
    }
}
