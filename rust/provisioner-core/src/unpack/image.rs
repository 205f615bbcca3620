//! Image source unpack (§4.2): spawn a dedicated unpack Pod whose init
//! container extracts the image's manifest directory onto a shared volume
//! and whose main container re-emits it as a JSON-encoded tar.gz on stdout
//! (§6 "Image-unpack log format"), which this process then reads back via
//! the orchestrator's log API.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, Volume, VolumeMount};
use kube::api::{LogParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Api;
use rukpak_crd::source::{ImageSource, ResolvedImageSource};
use rukpak_crd::ResolvedBundleSource;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};

use super::{UnpackContext, UnpackOutcome};
use crate::fs::BundleFs;

const MANIFEST_VOLUME: &str = "content";
const MANIFEST_MOUNT_PATH: &str = "/content";
const LOGS_CONTAINER: &str = "logs";

#[derive(Snafu, Debug)]
pub enum ImageUnpackError {
    #[snafu(display("failed to apply unpack pod for bundle {bundle_name:?}"))]
    ApplyPod {
        bundle_name: String,
        source: kube::Error,
    },

    #[snafu(display("failed to read logs of unpack pod for bundle {bundle_name:?}"))]
    ReadLogs {
        bundle_name: String,
        source: kube::Error,
    },

    #[snafu(display("unpack pod log output was not valid JSON"))]
    DecodeLogJson { source: serde_json::Error },

    #[snafu(display("unpack pod log's `content` field was not valid base64"))]
    DecodeBase64 { source: base64::DecodeError },

    #[snafu(display("failed to decode fetched archive"))]
    DecodeArchive { source: crate::fs::FsError },

    #[snafu(display("unpack pod has no status yet"))]
    NoPodStatus,
}

impl crate::error::ReconcilerError for ImageUnpackError {
    fn category(&self) -> &'static str {
        "ImageUnpackFailed"
    }

    fn is_transient(&self) -> bool {
        matches!(
            self,
            ImageUnpackError::ApplyPod { .. } | ImageUnpackError::ReadLogs { .. }
        )
    }
}

/// The single JSON object emitted by the logs container, per §6.
#[derive(Deserialize)]
struct LogPayload {
    content: String,
}

pub async fn unpack(
    ctx: &UnpackContext,
    bundle_name: &str,
    bundle_uid: Option<&str>,
    spec: &ImageSource,
) -> Result<UnpackOutcome, ImageUnpackError> {
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.bundle_namespace);
    let pod_name = unpack_pod_name(bundle_name);

    // §4.2 invariant: "Image unpacks create exactly one dedicated workload
    // per Bundle name; duplicates are reconciled to the canonical spec."
    // Server-side apply with a fixed, content-derived name gives us that for
    // free - a second reconcile for the same Bundle just re-applies the
    // same object instead of creating a sibling.
    let desired_pod = build_unpack_pod(&pod_name, bundle_name, bundle_uid, ctx, spec);
    pods.patch(
        &pod_name,
        &PatchParams::apply("rukpak-unpacker").force(),
        &Patch::Apply(&desired_pod),
    )
    .await
    .context(ApplyPodSnafu {
        bundle_name: bundle_name.to_string(),
    })?;

    let pod = pods.get(&pod_name).await.context(ApplyPodSnafu {
        bundle_name: bundle_name.to_string(),
    })?;
    let status = pod.status.context(NoPodStatusSnafu)?;
    let phase = status.phase.as_deref().unwrap_or("Pending");

    match phase {
        "Pending" => {
            let waiting_reason = status
                .container_statuses
                .unwrap_or_default()
                .into_iter()
                .find_map(|cs| cs.state?.waiting)
                .map(|w| w.message.or(w.reason).unwrap_or_default())
                .unwrap_or_else(|| "waiting for unpack pod to start".to_string());
            Ok(UnpackOutcome::pending(waiting_reason))
        }
        "Running" => Ok(UnpackOutcome::unpacking("unpack pod is running")),
        "Failed" => Ok(UnpackOutcome::failing(format!(
            "unpack pod {pod_name} failed: {}",
            status.message.unwrap_or_default()
        ))),
        "Succeeded" => {
            let logs = pods
                .logs(
                    &pod_name,
                    &LogParams {
                        container: Some(LOGS_CONTAINER.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .context(ReadLogsSnafu {
                    bundle_name: bundle_name.to_string(),
                })?;
            let payload: LogPayload =
                serde_json::from_str(logs.lines().next_back().unwrap_or_default())
                    .context(DecodeLogJsonSnafu)?;
            let archive = BASE64
                .decode(payload.content)
                .context(DecodeBase64Snafu)?;
            let fs = BundleFs::from_tar_gz(&archive).context(DecodeArchiveSnafu)?;

            let digest = status
                .container_statuses
                .unwrap_or_default()
                .into_iter()
                .find_map(|cs| cs.image_id)
                .unwrap_or_default();
            let resolved = ResolvedImageSource {
                image_ref: digest_pinned_ref(&spec.image_ref, &digest),
            };
            Ok(UnpackOutcome::unpacked(
                fs,
                ResolvedBundleSource::Image(resolved),
            ))
        }
        other => Ok(UnpackOutcome::pending(format!("unpack pod phase: {other}"))),
    }
}

fn unpack_pod_name(bundle_name: &str) -> String {
    format!("unpack-{bundle_name}")
}

/// Combines `spec.image_ref` with a digest observed from the running pod's
/// `imageID` into `<repository>@sha256:<digest>`, satisfying invariant 2
/// (§8): a resolved image source always carries a digest.
fn digest_pinned_ref(image_ref: &str, image_id: &str) -> String {
    if let Some((_, digest)) = image_id.rsplit_once('@') {
        let repository = image_ref.split(['@', ':']).next().unwrap_or(image_ref);
        format!("{repository}@{digest}")
    } else if image_ref.contains("@sha256:") {
        image_ref.to_string()
    } else {
        format!("{image_ref}@{image_id}")
    }
}

fn build_unpack_pod(
    pod_name: &str,
    bundle_name: &str,
    bundle_uid: Option<&str>,
    ctx: &UnpackContext,
    spec: &ImageSource,
) -> Pod {
    let pull_secrets = spec.image_pull_secret_name.as_ref().map(|name| {
        vec![k8s_openapi::api::core::v1::LocalObjectReference {
            name: name.clone(),
        }]
    });

    // §3 "Bundle owns any ephemeral unpack resources": an owner reference
    // to the Bundle lets the orchestrator's own garbage collector delete
    // this Pod when the Bundle goes away (§4.2 invariant), rather than the
    // Bundle controller's finalizer having to track it.
    let owner_references = bundle_uid.map(|uid| {
        vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            api_version: format!("{}/v1alpha1", rukpak_crd::GROUP),
            kind: "Bundle".to_string(),
            name: bundle_name.to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.to_string()),
            namespace: Some(ctx.bundle_namespace.clone()),
            labels: Some(
                [
                    ("core.rukpak.io/owner-kind".to_string(), "Bundle".to_string()),
                    ("core.rukpak.io/owner-name".to_string(), bundle_name.to_string()),
                ]
                .into_iter()
                .collect(),
            ),
            owner_references,
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            image_pull_secrets: pull_secrets,
            init_containers: Some(vec![Container {
                name: "extract".to_string(),
                image: Some(spec.image_ref.clone()),
                command: Some(vec![
                    "/bin/cp".to_string(),
                    "-r".to_string(),
                    "/manifests".to_string(),
                    format!("{MANIFEST_MOUNT_PATH}/manifests"),
                ]),
                volume_mounts: Some(vec![VolumeMount {
                    name: MANIFEST_VOLUME.to_string(),
                    mount_path: MANIFEST_MOUNT_PATH.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: LOGS_CONTAINER.to_string(),
                image: Some(ctx.unpack_image.clone()),
                args: Some(vec![
                    "export-content".to_string(),
                    format!("--source={MANIFEST_MOUNT_PATH}"),
                ]),
                volume_mounts: Some(vec![VolumeMount {
                    name: MANIFEST_VOLUME.to_string(),
                    mount_path: MANIFEST_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: MANIFEST_VOLUME.to_string(),
                empty_dir: Some(Default::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_pinned_ref_prefers_observed_image_id() {
        let pinned = digest_pinned_ref(
            "quay.io/acme/bundle:v1",
            "quay.io/acme/bundle@sha256:abcd",
        );
        assert_eq!(pinned, "quay.io/acme/bundle@sha256:abcd");
    }

    #[test]
    fn digest_pinned_ref_is_idempotent_on_already_pinned_refs() {
        let pinned = digest_pinned_ref("quay.io/acme/bundle@sha256:abcd", "");
        assert_eq!(pinned, "quay.io/acme/bundle@sha256:abcd");
    }

    #[test]
    fn unpack_pod_name_is_stable() {
        assert_eq!(unpack_pod_name("my-bundle"), "unpack-my-bundle");
        assert_eq!(unpack_pod_name("my-bundle"), unpack_pod_name("my-bundle"));
    }
}
