//! Resolves the §9 open question "the exact fingerprint algorithm for
//! BundleDeployment template → Bundle name suffix": a stable, content-derived
//! hash of the canonical JSON encoding of the [`BundleTemplate`], truncated to
//! 6 hex characters and appended to the owning `BundleDeployment`'s name.
//!
//! FNV-1a is used (not a cryptographic hash) because this only needs to be
//! stable and well-distributed, not collision-resistant against an adversary;
//! `fnv` is already part of this workspace's dependency set.

use fnv::FnvHasher;
use std::hash::Hasher;

use crate::bundle_deployment::BundleTemplate;

/// Bundle names are capped at 52 characters (§3). Reserve one for the `-`
/// separator and 6 for the hex suffix, so the owning name is truncated if
/// it would otherwise overflow.
const MAX_BUNDLE_NAME_LEN: usize = 52;
const SUFFIX_LEN: usize = 6;

/// Computes the content hash of a [`BundleTemplate`]: two templates that are
/// semantically identical (same fields, same values) hash identically,
/// satisfying invariant 3 (§8) — upgrading to a semantically-identical spec
/// must not create a new Bundle.
pub fn template_hash(template: &BundleTemplate) -> u64 {
    let canonical =
        serde_json::to_vec(template).expect("BundleTemplate serialization is infallible");
    let mut hasher = FnvHasher::default();
    hasher.write(&canonical);
    hasher.finish()
}

/// The name the child Bundle for `bundle_deployment_name` should carry, given
/// its desired `template`.
pub fn bundle_name(bundle_deployment_name: &str, template: &BundleTemplate) -> String {
    let hash = template_hash(template);
    let full_hex = format!("{hash:016x}");
    let suffix = &full_hex[full_hex.len() - SUFFIX_LEN..];

    let budget = MAX_BUNDLE_NAME_LEN - 1 - SUFFIX_LEN;
    let owner = if bundle_deployment_name.len() > budget {
        &bundle_deployment_name[..budget]
    } else {
        bundle_deployment_name
    };
    format!("{owner}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleSpec;
    use crate::bundle_deployment::BundleTemplateMetadata;
    use crate::source::{BundleSource, UploadSource};

    fn template() -> BundleTemplate {
        BundleTemplate {
            metadata: BundleTemplateMetadata::default(),
            spec: BundleSpec {
                provisioner_class_name: "core.rukpak.io/plain".into(),
                source: BundleSource::Upload(UploadSource {}),
            },
        }
    }

    #[test]
    fn identical_templates_hash_identically() {
        assert_eq!(template_hash(&template()), template_hash(&template()));
    }

    #[test]
    fn different_templates_hash_differently() {
        let mut other = template();
        other.spec.provisioner_class_name = "core.rukpak.io/registry".into();
        assert_ne!(template_hash(&template()), template_hash(&other));
    }

    #[test]
    fn bundle_name_is_stable_and_bounded() {
        let name_a = bundle_name("my-operator", &template());
        let name_b = bundle_name("my-operator", &template());
        assert_eq!(name_a, name_b);
        assert!(name_a.len() <= MAX_BUNDLE_NAME_LEN);
        assert!(name_a.starts_with("my-operator-"));
    }

    #[test]
    fn bundle_name_truncates_long_owners() {
        let long_owner = "a".repeat(60);
        let name = bundle_name(&long_owner, &template());
        assert!(name.len() <= MAX_BUNDLE_NAME_LEN);
    }
}
