//! Structural validation of the `manifests/` well-known path (§4.2, §7
//! "Structural" errors). Applied to Bundles whose `provisionerClassName` is
//! the `plain` class, both right after unpack (so `Bundle.status` reflects
//! it) and again inside [`crate::render::plain`] (render is pure and must
//! not trust that unpack already ran the check for this exact filesystem).

use snafu::Snafu;

use crate::fs::BundleFs;

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum PlainStructureError {
    #[snafu(display("found zero objects under manifests/"))]
    NoObjects,

    #[snafu(display("subdirectories are not allowed beneath manifests/, found {path:?}"))]
    NestedSubdirectory { path: String },
}

/// §4.2 invariant: "rejects manifest trees that contain subdirectories
/// beneath the well-known `manifests/` path ... or that contain zero
/// decodable objects."
pub fn check_manifests_structure(fs: &BundleFs) -> Result<(), PlainStructureError> {
    let mut object_count = 0usize;
    for (path, _) in fs.files_under("manifests") {
        let relative = path.strip_prefix("manifests/").unwrap_or(path);
        if relative.contains('/') {
            return NestedSubdirectorySnafu {
                path: path.to_string(),
            }
            .fail();
        }
        object_count += 1;
    }
    if object_count == 0 {
        return NoObjectsSnafu.fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_manifests() {
        let fs = BundleFs::new();
        assert_eq!(check_manifests_structure(&fs), Err(PlainStructureError::NoObjects));
    }

    #[test]
    fn rejects_nested_subdirectory() {
        let mut fs = BundleFs::new();
        fs.insert("manifests/sub/a.yaml", b"kind: ConfigMap".to_vec());
        assert!(matches!(
            check_manifests_structure(&fs),
            Err(PlainStructureError::NestedSubdirectory { .. })
        ));
    }

    #[test]
    fn accepts_flat_manifests() {
        let mut fs = BundleFs::new();
        fs.insert("manifests/00_namespace.yaml", b"kind: Namespace".to_vec());
        fs.insert("manifests/01_deployment.yaml", b"kind: Deployment".to_vec());
        assert!(check_manifests_structure(&fs).is_ok());
    }
}
