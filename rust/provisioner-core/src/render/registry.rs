//! Registry render (§4.3): convert a registry-format filesystem (an OLM/FBC
//! style bundle image layout with `manifests/` plus registry-specific
//! metadata such as `metadata/annotations.yaml`) into an equivalent plain
//! filesystem, then apply the plain rules.

use crate::fs::BundleFs;

use super::plain;
use super::plain::PlainRenderError;
use super::RenderedObject;

pub type RegistryRenderError = PlainRenderError;

/// A registry-format bundle already lays its manifests out under
/// `manifests/` exactly like the plain format; the registry-specific
/// `metadata/` directory (annotations, dependencies) only affects how the
/// bundle was *selected*, which is out of this engine's scope (§1
/// Non-goals: "resolving inter-bundle dependencies"). So conversion here is
/// the identity on `manifests/` plus dropping anything outside it.
pub fn render(fs: &BundleFs) -> Result<Vec<RenderedObject>, RegistryRenderError> {
    let plain_fs = to_plain_fs(fs);
    plain::render(&plain_fs)
}

fn to_plain_fs(fs: &BundleFs) -> BundleFs {
    let mut plain_fs = BundleFs::new();
    for (path, data) in fs.files_under("manifests") {
        plain_fs.insert(path.to_string(), data.to_vec());
    }
    plain_fs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_registry_metadata_directory() {
        let mut fs = BundleFs::new();
        fs.insert("manifests/ns.yaml", b"kind: Namespace\n".to_vec());
        fs.insert("metadata/annotations.yaml", b"annotations: {}\n".to_vec());

        let objects = render(&fs).unwrap();
        assert_eq!(objects.len(), 1);
    }
}
