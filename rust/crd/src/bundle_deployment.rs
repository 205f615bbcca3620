use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bundle::BundleSpec;
use crate::probe::AvailabilityProbe;

/// A `BundleDeployment` binds a [`BundleTemplate`] to a provisioner and
/// drives its install lifecycle. It is the only resource a user is expected
/// to edit directly (§3).
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, Serialize)]
#[kube(
    group = "core.rukpak.io",
    version = "v1alpha1",
    kind = "BundleDeployment",
    plural = "bundledeployments",
    shortname = "bdepl",
    status = "BundleDeploymentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentSpec {
    pub provisioner_class_name: String,
    /// The desired Bundle, re-created under a fingerprinted name whenever
    /// this template changes (§3, §9 "fingerprint algorithm").
    pub template: BundleTemplate,
    /// Opaque per-renderer configuration; interpreted only by the render
    /// variant in use (e.g. the chart renderer reads `config.values`, §4.3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Health checks evaluated against this deployment's owned objects (§4.4.1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_probes: Option<Vec<AvailabilityProbe>>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleTemplate {
    #[serde(default)]
    pub metadata: BundleTemplateMetadata,
    pub spec: BundleSpec,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleTemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentStatus {
    /// Name of the Bundle currently installed. Invariant 1 (§8): whenever
    /// `Installed=True`, this names a Bundle that exists and is `Unpacked=True`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_bundle: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BundleSource, UploadSource};

    #[test]
    fn template_metadata_defaults_empty() {
        let template = BundleTemplate {
            metadata: Default::default(),
            spec: BundleSpec {
                provisioner_class_name: "core.rukpak.io/plain".into(),
                source: BundleSource::Upload(UploadSource {}),
            },
        };
        assert!(template.metadata.labels.is_none());
    }
}
