//! ConfigMaps source unpack (§4.2): read data + binary data directly from
//! the orchestrator for each referenced, immutable ConfigMap.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use rukpak_crd::source::ConfigMapSource;
use rukpak_crd::ResolvedBundleSource;
use snafu::{OptionExt, ResultExt, Snafu};

use super::{UnpackContext, UnpackOutcome};
use crate::fs::BundleFs;

#[derive(Snafu, Debug)]
pub enum ConfigMapUnpackError {
    #[snafu(display("failed to read config map {name:?}"))]
    Read { name: String, source: kube::Error },

    #[snafu(display(
        "config map {name:?} is not immutable; only immutable config maps may back a Bundle (§6)"
    ))]
    NotImmutable { name: String },

    #[snafu(display("config map {name:?} has neither data nor binaryData"))]
    Empty { name: String },
}

impl crate::error::ReconcilerError for ConfigMapUnpackError {
    fn category(&self) -> &'static str {
        match self {
            ConfigMapUnpackError::Read { .. } => "ConfigMapUnpackFailed",
            ConfigMapUnpackError::NotImmutable { .. } => "ConfigMapUnpackFailed",
            ConfigMapUnpackError::Empty { .. } => "ConfigMapUnpackFailed",
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, ConfigMapUnpackError::Read { .. })
    }
}

pub async fn unpack(
    ctx: &UnpackContext,
    specs: &[ConfigMapSource],
) -> Result<UnpackOutcome, ConfigMapUnpackError> {
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.bundle_namespace);
    let mut fs = BundleFs::new();

    for entry in specs {
        let name = &entry.config_map.name;
        let config_map = config_maps
            .get(name)
            .await
            .context(ReadSnafu { name: name.clone() })?;

        // §9 Open Question, resolved in favor of "reject at unpack": the
        // admission webhook (out of scope here) can't be relied on to have
        // run, so the unpacker re-checks immutability itself.
        if config_map.immutable != Some(true) {
            return NotImmutableSnafu { name: name.clone() }.fail();
        }

        let has_data = config_map.data.as_ref().is_some_and(|d| !d.is_empty());
        let has_binary = config_map
            .binary_data
            .as_ref()
            .is_some_and(|d| !d.is_empty());
        if !has_data && !has_binary {
            return EmptySnafu { name: name.clone() }.fail();
        }

        for (key, value) in config_map.data.into_iter().flatten() {
            fs.insert(join_path(&entry.path, &key), value.into_bytes());
        }
        for (key, value) in config_map.binary_data.into_iter().flatten() {
            fs.insert(join_path(&entry.path, &key), value.0);
        }
    }

    Ok(UnpackOutcome::unpacked(
        fs,
        ResolvedBundleSource::ConfigMaps(specs.to_vec()),
    ))
}

fn join_path(subpath: &str, key: &str) -> String {
    format!("{}/{key}", subpath.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_normalizes_trailing_slash() {
        assert_eq!(join_path("manifests/", "a.yaml"), "manifests/a.yaml");
        assert_eq!(join_path("manifests", "a.yaml"), "manifests/a.yaml");
    }
}
