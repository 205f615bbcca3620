use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::source::{BundleSource, ResolvedBundleSource};

/// A `Bundle` names one immutable content source. It is usually created and
/// owned by a `BundleDeployment`, never edited directly by a user (§3).
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, Serialize)]
#[kube(
    group = "core.rukpak.io",
    version = "v1alpha1",
    kind = "Bundle",
    plural = "bundles",
    shortname = "bd",
    status = "BundleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// The provisioner instance that should reconcile this Bundle.
    pub provisioner_class_name: String,
    /// Exactly one source variant, see §6.
    pub source: BundleSource,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(default)]
    pub phase: BundlePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_source: Option<ResolvedBundleSource>,
    /// Location at which `GET`-ing the archive (with a valid bearer token)
    /// returns this Bundle's content, see §4.1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum BundlePhase {
    #[default]
    Pending,
    Unpacking,
    Unpacked,
    Failing,
}

impl Bundle {
    /// `true` once unpack has produced content that downstream (render,
    /// install) can read — invariants 1 and 2 (§8) hinge on this.
    pub fn is_unpacked(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.phase == BundlePhase::Unpacked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_pending() {
        assert_eq!(BundleStatus::default().phase, BundlePhase::Pending);
    }
}
