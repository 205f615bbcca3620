//! Plain render (§4.3): read every file under `manifests/`, parse as
//! YAML/JSON, require `kind` present, yield the decoded objects.

use serde::Deserialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use super::RenderedObject;
use crate::fs::BundleFs;
use crate::unpack::validate::{self, PlainStructureError};

#[derive(Snafu, Debug)]
pub enum PlainRenderError {
    #[snafu(display("manifest structure invalid"), context(false))]
    Structure { source: PlainStructureError },

    #[snafu(display("failed to parse {path:?} as YAML/JSON"))]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("object decoded from {path:?} is missing `kind`"))]
    MissingKind { path: String },
}

impl crate::error::ReconcilerError for PlainRenderError {
    fn category(&self) -> &'static str {
        "InstallFailed"
    }
}

pub fn render(fs: &BundleFs) -> Result<Vec<RenderedObject>, PlainRenderError> {
    validate::check_manifests_structure(fs)?;

    let mut objects = Vec::new();
    for (path, data) in fs.files_under("manifests") {
        let text = String::from_utf8_lossy(data);
        // Multiple `---`-separated documents in one file, and a bare list
        // of objects in a single document, both flatten into the same
        // output list (§4.3 "multi-document separators and list-flattening
        // supported").
        for document in serde_yaml::Deserializer::from_str(&text) {
            let value = Value::deserialize(document).with_context(|_| ParseSnafu {
                path: path.to_string(),
            })?;
            if value.is_null() {
                continue;
            }
            flatten_into(value, &mut objects, path)?;
        }
    }

    if objects.is_empty() {
        // check_manifests_structure only guarantees at least one file under
        // manifests/, not that it decoded to a non-empty object: an
        // all-null or empty-list document can still reach here.
        return Err(PlainStructureError::NoObjects.into());
    }

    Ok(objects)
}

fn flatten_into(
    value: Value,
    out: &mut Vec<RenderedObject>,
    path: &str,
) -> Result<(), PlainRenderError> {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out, path)?;
            }
        }
        Value::Object(ref map) => {
            if !map.contains_key("kind") {
                return MissingKindSnafu {
                    path: path.to_string(),
                }
                .fail();
            }
            out.push(value);
        }
        _ => {
            return MissingKindSnafu {
                path: path.to_string(),
            }
            .fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn renders_single_document() {
        let mut fs = BundleFs::new();
        fs.insert(
            "manifests/ns.yaml",
            b"kind: Namespace\nmetadata:\n  name: foo\n".to_vec(),
        );
        let objects = render(&fs).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["kind"], "Namespace");
    }

    #[test]
    fn renders_multi_document_file() {
        let mut fs = BundleFs::new();
        fs.insert(
            "manifests/all.yaml",
            b"kind: Namespace\n---\nkind: ConfigMap\n".to_vec(),
        );
        let objects = render(&fs).unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn flattens_yaml_list() {
        let mut fs = BundleFs::new();
        fs.insert(
            "manifests/list.yaml",
            b"- kind: Namespace\n- kind: ConfigMap\n".to_vec(),
        );
        let objects = render(&fs).unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn fails_without_kind() {
        let mut fs = BundleFs::new();
        fs.insert("manifests/bad.yaml", b"metadata:\n  name: foo\n".to_vec());
        assert!(matches!(render(&fs), Err(PlainRenderError::MissingKind { .. })));
    }

    #[test]
    fn fails_on_empty_manifests() {
        let fs = BundleFs::new();
        assert!(matches!(render(&fs), Err(PlainRenderError::Structure { .. })));
    }
}
