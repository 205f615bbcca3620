//! Applying rendered objects to the target cluster (§4.4): ownership
//! labeling, server-side apply, and the orphan sweep's object bookkeeping.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Api, Client};
use rukpak_crd::owner_labels;
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};

use super::release::ObjectRef;
use super::FIELD_MANAGER;
use crate::render::RenderedObject;

#[derive(Snafu, Debug)]
pub enum ApplyError {
    #[snafu(display("rendered object is missing {field}"))]
    MissingField { field: &'static str },

    /// §4.4 step 6: a patch that 404s means the API server has no such
    /// `kind` registered at all (apply always creates on first write, so a
    /// 404 here can't mean "object missing") - almost always a required CRD
    /// that hasn't been installed in the target cluster.
    #[snafu(display("required resource kind {kind:?} not found in target cluster"))]
    KindNotFound {
        kind: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("failed to apply {kind} {name:?}"))]
    Apply {
        kind: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("failed to delete {kind} {name:?}"))]
    Delete {
        kind: String,
        name: String,
        source: kube::Error,
    },
}

impl crate::error::ReconcilerError for ApplyError {
    fn category(&self) -> &'static str {
        "InstallFailed"
    }
}

/// Set `<key>/owner-kind` and `<key>/owner-name` labels on the object (§4.4
/// "Tie-break rules"). Takes ownership and returns it since every object is
/// rendered fresh on every tick - no in-place mutation of cluster state here.
pub fn label_owned(mut object: RenderedObject, deployment_name: &str) -> RenderedObject {
    let metadata = object
        .as_object_mut()
        .expect("render() only ever produces JSON objects")
        .entry("metadata")
        .or_insert_with(|| serde_json::json!({}));
    let labels = metadata
        .as_object_mut()
        .expect("metadata is always an object")
        .entry("labels")
        .or_insert_with(|| serde_json::json!({}));
    let labels = labels.as_object_mut().expect("labels is always an object");
    labels.insert(
        owner_labels::OWNER_KIND.to_string(),
        serde_json::Value::String("BundleDeployment".to_string()),
    );
    labels.insert(
        owner_labels::OWNER_NAME.to_string(),
        serde_json::Value::String(deployment_name.to_string()),
    );
    object
}

pub fn object_refs(objects: &[RenderedObject]) -> Vec<ObjectRef> {
    objects
        .iter()
        .filter_map(|object| {
            Some(ObjectRef {
                api_version: object.get("apiVersion")?.as_str()?.to_string(),
                kind: object.get("kind")?.as_str()?.to_string(),
                namespace: object
                    .pointer("/metadata/namespace")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                name: object.pointer("/metadata/name")?.as_str()?.to_string(),
            })
        })
        .collect()
}

/// A stable content hash of the whole rendered set, used to decide whether a
/// reconciliation tick is `NeedsUpgrade` or `Unchanged` (§4.4 step 3).
pub fn manifest_hash(objects: &[RenderedObject]) -> String {
    let canonical = serde_json::to_vec(objects).expect("rendered objects always serialize");
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

fn api_resource_for(object: &RenderedObject) -> Result<ApiResource, ApplyError> {
    let api_version = object
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .with_context(|| MissingFieldSnafu { field: "apiVersion" })?;
    let kind = object
        .get("kind")
        .and_then(|v| v.as_str())
        .with_context(|| MissingFieldSnafu { field: "kind" })?;
    let (group, version) = split_api_version(api_version);
    Ok(ApiResource::from_gvk(&GroupVersionKind::gvk(&group, &version, kind)))
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

pub async fn apply_object(
    client: &Client,
    default_namespace: &str,
    object: &RenderedObject,
) -> Result<(), ApplyError> {
    let resource = api_resource_for(object)?;
    let kind = resource.kind.clone();
    let name = object
        .pointer("/metadata/name")
        .and_then(|v| v.as_str())
        .with_context(|| MissingFieldSnafu { field: "metadata.name" })?
        .to_string();
    let namespace = object
        .pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
        .unwrap_or(default_namespace);

    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &resource);
    let dynamic_object: DynamicObject =
        serde_json::from_value(object.clone()).expect("rendered object decodes as DynamicObject");

    match api
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&dynamic_object),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Err(ApplyError::KindNotFound {
            kind,
            name,
            source: kube::Error::Api(err),
        }),
        Err(source) => Err(ApplyError::Apply { kind, name, source }),
    }
}

pub async fn delete_object(
    client: &Client,
    default_namespace: &str,
    object_ref: &ObjectRef,
) -> Result<(), ApplyError> {
    let (group, version) = split_api_version(&object_ref.api_version);
    let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(&group, &version, &object_ref.kind));
    let namespace = object_ref.namespace.as_deref().unwrap_or(default_namespace);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &resource);

    match api.delete(&object_ref.name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(source) => Err(ApplyError::Delete {
            kind: object_ref.kind.clone(),
            name: object_ref.name.clone(),
            source,
        }),
    }
}

/// Only used to filter label-selector probes (§4.4.1); object labels are
/// matched against both `match_labels` and `match_expressions`.
pub fn matches_label_selector(labels: &std::collections::BTreeMap<String, String>, selector: &LabelSelector) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let present = labels.get(&expr.key);
            let satisfied = match expr.operator.as_str() {
                "In" => present.is_some_and(|v| expr.values.as_ref().is_some_and(|vs| vs.contains(v))),
                "NotIn" => !present.is_some_and(|v| expr.values.as_ref().is_some_and(|vs| vs.contains(v))),
                "Exists" => present.is_some(),
                "DoesNotExist" => present.is_none(),
                _ => false,
            };
            if !satisfied {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_object_with_owner() {
        let object = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "foo"}});
        let labeled = label_owned(object, "my-deployment");
        assert_eq!(
            labeled["metadata"]["labels"][owner_labels::OWNER_NAME],
            "my-deployment"
        );
    }

    #[test]
    fn object_refs_skips_incomplete_entries() {
        let objects = vec![
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "foo"}}),
            json!({"kind": "Secret"}),
        ];
        let refs = object_refs(&objects);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "foo");
    }

    #[test]
    fn manifest_hash_is_stable_across_equal_inputs() {
        let objects = vec![json!({"apiVersion": "v1", "kind": "ConfigMap"})];
        assert_eq!(manifest_hash(&objects), manifest_hash(&objects.clone()));
    }

    #[test]
    fn splits_group_and_core_api_version() {
        assert_eq!(split_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
        assert_eq!(split_api_version("v1"), (String::new(), "v1".to_string()));
    }
}
