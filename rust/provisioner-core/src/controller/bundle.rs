//! The Bundle controller (C5, §4.5): drives a [`Bundle`] through [`crate::unpack`]
//! to steady state, writes `Unpacked`/`ContentURL`/`ResolvedSource` status,
//! and runs the finalizer that removes the cached archive on deletion.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube::runtime::watcher;
use kube::ResourceExt;
use rukpak_crd::condition::{bundle_condition, reason, ConditionStatus};
use rukpak_crd::{Bundle, BundlePhase, BundleStatus, ResolvedBundleSource, BUNDLE_FINALIZER};
use snafu::{ResultExt, Snafu};

use super::{requeue_pending, requeue_transient, Ctx};
use crate::error::ReconcilerError;
use crate::render::RenderVariant;
use crate::unpack::{self, validate, UnpackError, UnpackOutcome};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to unpack bundle {name:?}"))]
    Unpack { name: String, source: UnpackError },

    #[snafu(display("failed to store archive for bundle {name:?}"))]
    Store {
        name: String,
        source: crate::storage::StoreError,
    },

    #[snafu(display("failed to patch status for bundle {name:?}"))]
    PatchStatus { name: String, source: kube::Error },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        match self {
            Error::Unpack { source, .. } => source.category(),
            Error::Store { .. } | Error::PatchStatus { .. } => reason::RECONCILE_FAILED,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Error::Unpack { source, .. } if source.is_transient())
    }
}

/// Runs the Bundle controller to completion (forever, barring a shutdown
/// signal); one call per provisioner process (§4.5 "a given instance serves
/// exactly one provisioner ID").
pub async fn run(ctx: Arc<Ctx>) {
    let concurrency = ctx.max_concurrent_reconciles;
    let api: Api<Bundle> = Api::all(ctx.client.clone());
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each_concurrent(concurrency, |result| async move {
            match result {
                Ok((object_ref, _)) => {
                    tracing::debug!(bundle = %object_ref.name, "reconciled bundle")
                }
                Err(error) => tracing::warn!(%error, "bundle reconcile failed"),
            }
        })
        .await;
}

async fn reconcile(bundle: Arc<Bundle>, ctx: Arc<Ctx>) -> Result<Action, FinalizerError<Error>> {
    if bundle.spec.provisioner_class_name != ctx.provisioner_class_name {
        return Ok(Action::await_change());
    }
    if !ctx.leader.is_leader() {
        return Ok(requeue_transient());
    }

    let api: Api<Bundle> = Api::all(ctx.client.clone());
    finalizer(&api, BUNDLE_FINALIZER, bundle, |event| async {
        match event {
            FinalizerEvent::Apply(bundle) => apply(&bundle, &ctx).await,
            FinalizerEvent::Cleanup(bundle) => cleanup(&bundle, &ctx).await,
        }
    })
    .await
}

fn error_policy(_bundle: Arc<Bundle>, error: &FinalizerError<Error>, _ctx: Arc<Ctx>) -> Action {
    tracing::warn!(%error, "bundle reconcile error, requeuing");
    requeue_transient()
}

async fn apply(bundle: &Bundle, ctx: &Ctx) -> Result<Action, Error> {
    let name = bundle.name_any();
    let result = unpack::unpack(
        &ctx.unpack,
        &name,
        bundle.uid().as_deref(),
        &bundle.spec.source,
    )
    .await;
    let outcome = classify_unpack_result(result)
        .with_context(|_| UnpackSnafu { name: name.clone() })?;

    let (outcome, action) = finalize_structure(bundle, outcome);

    if outcome.phase == BundlePhase::Unpacked {
        if let Some(fs) = &outcome.fs {
            ctx.store
                .store(&name, fs)
                .await
                .with_context(|_| StoreSnafu { name: name.clone() })?;
        }
    }

    let content_url = if outcome.phase == BundlePhase::Unpacked {
        Some(ctx.store.url(&name))
    } else {
        None
    };

    patch_status(&api_for(ctx), bundle, &outcome, content_url)
        .await
        .with_context(|_| PatchStatusSnafu { name: name.clone() })?;

    Ok(action)
}

/// Turns an [`unpack::unpack`] result into an [`UnpackOutcome`], resolving
/// §7's split between the "Transient" and "Structural"/"Validation"
/// categories: a transient error (network blip, image pull back-off)
/// propagates as `Err` so the reconcile loop retries without touching status;
/// anything else becomes a terminal `Failing` outcome carrying the error's
/// message, since the Bundle's spec is immutable and can't be fixed by
/// retrying.
fn classify_unpack_result(result: Result<UnpackOutcome, UnpackError>) -> Result<UnpackOutcome, UnpackError> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(error) if !error.is_transient() => Ok(UnpackOutcome {
            phase: BundlePhase::Failing,
            fs: None,
            resolved_source: None,
            message: error.to_string(),
        }),
        Err(error) => Err(error),
    }
}

/// Runs the §4.2 "subdirectories not allowed / zero objects" structural
/// check on the plain provisioner class only (§4.2: "plain variant only"),
/// turning an otherwise-successful unpack into a non-retryable `Failing`
/// one if it fails.
fn finalize_structure(bundle: &Bundle, outcome: UnpackOutcome) -> (UnpackOutcome, Action) {
    if outcome.phase != BundlePhase::Unpacked {
        let action = match outcome.phase {
            BundlePhase::Failing => Action::await_change(),
            _ => requeue_pending(),
        };
        return (outcome, action);
    }

    let is_plain = matches!(
        RenderVariant::from_provisioner_class(&bundle.spec.provisioner_class_name),
        Some(RenderVariant::Plain)
    );

    if is_plain {
        if let Some(fs) = &outcome.fs {
            if let Err(structure_error) = validate::check_manifests_structure(fs) {
                return (
                    UnpackOutcome {
                        phase: BundlePhase::Failing,
                        fs: None,
                        resolved_source: None,
                        message: structure_error.to_string(),
                    },
                    Action::await_change(),
                );
            }
        }
    }

    (outcome, Action::await_change())
}

async fn cleanup(bundle: &Bundle, ctx: &Ctx) -> Result<Action, Error> {
    let name = bundle.name_any();
    ctx.store
        .delete(&name)
        .await
        .with_context(|_| StoreSnafu { name: name.clone() })?;
    Ok(Action::await_change())
}

fn api_for(ctx: &Ctx) -> Api<Bundle> {
    Api::all(ctx.client.clone())
}

async fn patch_status(
    api: &Api<Bundle>,
    bundle: &Bundle,
    outcome: &UnpackOutcome,
    content_url: Option<String>,
) -> Result<(), kube::Error> {
    let name = bundle.name_any();
    let mut status: BundleStatus = bundle.status.clone().unwrap_or_default();

    status.phase = outcome.phase;
    status.content_url = content_url;
    if outcome.phase == BundlePhase::Unpacked {
        status.resolved_source = outcome.resolved_source.clone();
    }

    let (condition_status, reason) = match outcome.phase {
        BundlePhase::Pending => (ConditionStatus::Unknown, reason::UNPACK_PENDING),
        BundlePhase::Unpacking => (ConditionStatus::Unknown, reason::UNPACKING),
        BundlePhase::Unpacked => (ConditionStatus::True, reason::UNPACK_SUCCESSFUL),
        BundlePhase::Failing => (ConditionStatus::False, reason::UNPACK_FAILED),
    };

    rukpak_crd::condition::set_condition(
        &mut status.conditions,
        bundle_condition::UNPACKED,
        condition_status,
        reason,
        outcome.message.clone(),
        bundle.metadata.generation,
        k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()),
    );
    status.observed_generation = bundle.metadata.generation;

    let patch = serde_json::json!({ "status": status });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

/// Resolves the §9 open question "whether a Bundle referenced by a
/// non-immutable config map should be rejected at admission or at unpack":
/// this engine rejects at unpack (see [`crate::unpack::configmaps`]), since
/// the admission webhook is explicitly out of scope (§1) and unpack cannot
/// assume it ran.
#[cfg(test)]
mod tests {
    use super::*;
    use rukpak_crd::source::{BundleSource, UploadSource};
    use rukpak_crd::BundleSpec;

    fn bundle(provisioner_class_name: &str) -> Bundle {
        Bundle::new(
            "my-bundle",
            BundleSpec {
                provisioner_class_name: provisioner_class_name.to_string(),
                source: BundleSource::Upload(UploadSource {}),
            },
        )
    }

    #[test]
    fn non_plain_classes_skip_structural_check() {
        let bundle = bundle("core.rukpak.io/registry");
        let mut fs = crate::fs::BundleFs::new();
        fs.insert("manifests/sub/a.yaml", b"kind: ConfigMap".to_vec());
        let outcome = UnpackOutcome {
            phase: BundlePhase::Unpacked,
            fs: Some(fs),
            resolved_source: Some(ResolvedBundleSource::Upload(
                rukpak_crd::source::UploadSource {},
            )),
            message: "unpack successful".into(),
        };
        let (outcome, _) = finalize_structure(&bundle, outcome);
        assert_eq!(outcome.phase, BundlePhase::Unpacked);
    }

    #[test]
    fn plain_class_rejects_nested_subdirectory() {
        let bundle = bundle("core.rukpak.io/plain");
        let mut fs = crate::fs::BundleFs::new();
        fs.insert("manifests/sub/a.yaml", b"kind: ConfigMap".to_vec());
        let outcome = UnpackOutcome {
            phase: BundlePhase::Unpacked,
            fs: Some(fs),
            resolved_source: Some(ResolvedBundleSource::Upload(
                rukpak_crd::source::UploadSource {},
            )),
            message: "unpack successful".into(),
        };
        let (outcome, _) = finalize_structure(&bundle, outcome);
        assert_eq!(outcome.phase, BundlePhase::Failing);
        assert!(outcome.message.contains("subdirectories are not allowed"));
    }

    #[test]
    fn plain_class_rejects_empty_manifests() {
        let bundle = bundle("core.rukpak.io/plain");
        let outcome = UnpackOutcome {
            phase: BundlePhase::Unpacked,
            fs: Some(crate::fs::BundleFs::new()),
            resolved_source: Some(ResolvedBundleSource::Upload(
                rukpak_crd::source::UploadSource {},
            )),
            message: "unpack successful".into(),
        };
        let (outcome, _) = finalize_structure(&bundle, outcome);
        assert_eq!(outcome.phase, BundlePhase::Failing);
        assert!(outcome.message.contains("found zero objects"));
    }

    #[test]
    fn non_transient_unpack_error_becomes_failing_outcome() {
        let error = UnpackError::ConfigMaps {
            source: crate::unpack::configmaps::ConfigMapUnpackError::NotImmutable {
                name: "cm".to_string(),
            },
        };
        let outcome = classify_unpack_result(Err(error)).unwrap();
        assert_eq!(outcome.phase, BundlePhase::Failing);
        assert!(outcome.message.contains("not immutable"));
    }

    #[test]
    fn transient_unpack_error_still_propagates() {
        let error = UnpackError::Image {
            source: crate::unpack::image::ImageUnpackError::ApplyPod {
                bundle_name: "my-bundle".to_string(),
                source: kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "server unavailable".to_string(),
                    reason: "ServiceUnavailable".to_string(),
                    code: 503,
                }),
            },
        };
        assert!(classify_unpack_result(Err(error)).is_err());
    }

    #[test]
    fn successful_unpack_passes_through_unchanged() {
        let outcome = UnpackOutcome {
            phase: BundlePhase::Unpacked,
            fs: Some(crate::fs::BundleFs::new()),
            resolved_source: Some(ResolvedBundleSource::Upload(
                rukpak_crd::source::UploadSource {},
            )),
            message: "unpack successful".into(),
        };
        let result = classify_unpack_result(Ok(outcome));
        assert_eq!(result.unwrap().phase, BundlePhase::Unpacked);
    }
}
