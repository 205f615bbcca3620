//! The Bundle source tagged union (§6) and its pinned counterpart.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exactly one variant is ever populated; this is modeled as a Rust `enum`
/// rather than a struct-of-options so the unpacker's dispatch table (§9
/// "Dynamic dispatch over source variants") can match exhaustively.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BundleSource {
    Image(ImageSource),
    Git(GitSource),
    Http(HttpSource),
    ConfigMaps(Vec<ConfigMapSource>),
    Upload(UploadSource),
}

impl BundleSource {
    /// Short, stable tag used in status messages and metrics — never derived
    /// from `Debug`, which is allowed to change shape across refactors.
    pub fn kind(&self) -> &'static str {
        match self {
            BundleSource::Image(_) => "image",
            BundleSource::Git(_) => "git",
            BundleSource::Http(_) => "http",
            BundleSource::ConfigMaps(_) => "configMaps",
            BundleSource::Upload(_) => "upload",
        }
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    /// Image reference, e.g. `quay.io/acme/bundle:v1`. May already carry a
    /// digest, in which case resolution is a no-op.
    #[serde(rename = "ref")]
    pub image_ref: String,
    /// Name of a `kubernetes.io/dockerconfigjson` Secret in the Bundle's
    /// namespace used to pull `ref`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
    /// PEM-encoded CA bundle used to verify the registry's TLS certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub repository: String,
    /// Subdirectory within the repository that is the bundle root. Defaults
    /// to the repository root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(rename = "ref")]
    pub reference: GitRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<GitAuth>,
}

/// Exactly one of `branch`, `tag`, `commit` is populated (enforced by the
/// admission webhook, out of scope here; the unpacker re-checks it anyway
/// since the webhook cannot be assumed to have run, see §4.2).
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuth {
    /// Secret with `username`/`password` (or `ssh-privatekey`) keys.
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HttpAuth>,
    /// PEM-encoded CA bundle used to verify `url`'s TLS certificate, in
    /// place of the system trust store (§4.2 "optional CA override").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAuth {
    /// Secret with `username`/`password` keys, sent as HTTP basic auth.
    pub secret_name: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapSource {
    pub config_map: LocalObjectReference,
    /// Subpath under the virtual filesystem root this ConfigMap is mounted at.
    pub path: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct LocalObjectReference {
    pub name: String,
}

/// No fields: the content already lives in the upload cache, keyed by Bundle
/// name (§4.6). Kept as a struct (not a unit variant) so a future field can
/// be added without a wire-format break.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct UploadSource {}

/// The pinned counterpart of [`BundleSource`]: every mutable reference
/// (branch, tag, floating image tag) has been resolved to an immutable one.
/// Invariant 2 (§8): whenever a Bundle reports `Unpacked=True`, its
/// `resolvedSource`'s pinning field is populated.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolvedBundleSource {
    Image(ResolvedImageSource),
    Git(ResolvedGitSource),
    Http(HttpSource),
    ConfigMaps(Vec<ConfigMapSource>),
    Upload(UploadSource),
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedImageSource {
    /// `<repository>@sha256:<digest>`, always carrying a digest post-resolution.
    #[serde(rename = "ref")]
    pub image_ref: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedGitSource {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Full 40-character commit SHA, even when the user specified a branch or tag.
    pub commit: String,
}

impl ResolvedImageSource {
    /// `true` iff `image_ref` carries a `@sha256:` digest, as required by
    /// invariant 2 (§8).
    pub fn is_pinned(&self) -> bool {
        self.image_ref.contains("@sha256:")
    }
}

impl ResolvedGitSource {
    /// `true` iff `commit` is a full, lower-hex 40-character SHA-1.
    pub fn is_pinned(&self) -> bool {
        self.commit.len() == 40 && self.commit.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_tags() {
        assert_eq!(
            BundleSource::Image(ImageSource {
                image_ref: "x".into(),
                image_pull_secret_name: None,
                insecure_skip_tls_verify: None,
                certificate_data: None,
            })
            .kind(),
            "image"
        );
        assert_eq!(BundleSource::Upload(UploadSource {}).kind(), "upload");
    }

    #[test]
    fn resolved_image_pinning() {
        let pinned = ResolvedImageSource {
            image_ref: "quay.io/acme/bundle@sha256:abc".into(),
        };
        assert!(pinned.is_pinned());
        let unpinned = ResolvedImageSource {
            image_ref: "quay.io/acme/bundle:v1".into(),
        };
        assert!(!unpinned.is_pinned());
    }

    #[test]
    fn resolved_git_pinning_requires_full_sha() {
        let pinned = ResolvedGitSource {
            repository: "https://example.com/repo.git".into(),
            directory: None,
            commit: "a".repeat(40),
        };
        assert!(pinned.is_pinned());
        let short = ResolvedGitSource {
            commit: "abc123".into(),
            ..pinned
        };
        assert!(!short.is_pinned());
    }
}
