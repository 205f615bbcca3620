//! Upload Ingestion's process-local cache (C6, §4.6): a directory keyed by
//! Bundle name that the upload server writes to and the unpacker's `Upload`
//! variant reads from. Shared (behind an [`std::sync::Arc`]) between the
//! `rukpak-upload-server` binary and, when colocated, the operator binary's
//! unpacker.

use std::path::PathBuf;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};
use tokio::fs;

use crate::fs::BundleFs;

#[derive(Snafu, Debug)]
pub enum UploadCacheError {
    #[snafu(display("no upload cached for bundle {bundle_name:?}"))]
    NotFound { bundle_name: String },

    #[snafu(display("failed to read upload cache for bundle {bundle_name:?}"))]
    Io {
        bundle_name: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to decode cached upload for bundle {bundle_name:?}"))]
    Decode {
        bundle_name: String,
        source: crate::fs::FsError,
    },
}

/// Cheaply cloneable handle; the unpacker holds one of these rather than a
/// bare path so tests can swap in an in-memory cache without touching disk.
#[derive(Clone)]
pub struct UploadCacheHandle(Arc<UploadCacheInner>);

struct UploadCacheInner {
    root: PathBuf,
}

impl UploadCacheHandle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(Arc::new(UploadCacheInner { root: root.into() }))
    }

    fn path(&self, bundle_name: &str) -> PathBuf {
        self.0.root.join(format!("{bundle_name}.tgz"))
    }

    /// Replaces the cached upload for `bundle_name` atomically (§4.6
    /// "Re-upload replaces prior contents atomically"), called by the
    /// upload server on `PUT /uploads/<name>`.
    pub async fn put(&self, bundle_name: &str, archive_bytes: &[u8]) -> Result<(), UploadCacheError> {
        fs::create_dir_all(&self.0.root)
            .await
            .with_context(|_| IoSnafu {
                bundle_name: bundle_name.to_string(),
            })?;
        let tmp_path = self.0.root.join(format!(".{bundle_name}.tmp"));
        fs::write(&tmp_path, archive_bytes)
            .await
            .with_context(|_| IoSnafu {
                bundle_name: bundle_name.to_string(),
            })?;
        fs::rename(&tmp_path, self.path(bundle_name))
            .await
            .with_context(|_| IoSnafu {
                bundle_name: bundle_name.to_string(),
            })?;
        Ok(())
    }

    /// Read back the cached upload for `bundle_name`, decoded into a
    /// [`BundleFs`]. Called by the unpacker's `Upload` variant.
    pub async fn get(&self, bundle_name: &str) -> Result<BundleFs, UploadCacheError> {
        let bytes = fs::read(self.path(bundle_name)).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                NotFoundSnafu {
                    bundle_name: bundle_name.to_string(),
                }
                .build()
            } else {
                UploadCacheError::Io {
                    bundle_name: bundle_name.to_string(),
                    source,
                }
            }
        })?;
        BundleFs::from_tar_gz(&bytes).with_context(|_| DecodeSnafu {
            bundle_name: bundle_name.to_string(),
        })
    }

    pub async fn delete(&self, bundle_name: &str) -> Result<(), UploadCacheError> {
        match fs::remove_file(self.path(bundle_name)).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(UploadCacheError::Io {
                bundle_name: bundle_name.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = UploadCacheHandle::new(dir.path());
        let mut fs = BundleFs::new();
        fs.insert("manifests/a.yaml", b"a: 1".to_vec());
        cache.put("my-bundle", &fs.to_tar_gz().unwrap()).await.unwrap();

        let loaded = cache.get("my-bundle").await.unwrap();
        assert_eq!(fs, loaded);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = UploadCacheHandle::new(dir.path());
        assert!(matches!(
            cache.get("missing").await,
            Err(UploadCacheError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reupload_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let cache = UploadCacheHandle::new(dir.path());
        let mut first = BundleFs::new();
        first.insert("manifests/a.yaml", b"1".to_vec());
        cache.put("b", &first.to_tar_gz().unwrap()).await.unwrap();

        let mut second = BundleFs::new();
        second.insert("manifests/a.yaml", b"2".to_vec());
        cache.put("b", &second.to_tar_gz().unwrap()).await.unwrap();

        assert_eq!(cache.get("b").await.unwrap(), second);
    }
}
