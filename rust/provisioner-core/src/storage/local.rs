//! The leader's writer/reader implementation of [`super::Store`] (§4.1).

use std::path::{Path, PathBuf};

use snafu::{OptionExt, ResultExt};
use tokio::fs;

use super::{IoSnafu, NotFoundSnafu, SerializeSnafu, Store, StoreError};
use crate::fs::BundleFs;

/// Persists one tar.gz per Bundle under `root`, named `<bundle_name>.tgz`
/// (§6 "Persisted state layout"), permissioned 0600.
pub struct LocalStore {
    root: PathBuf,
    external_base_url: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, external_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            external_base_url: external_base_url.into(),
        }
    }

    fn archive_path(&self, bundle_name: &str) -> PathBuf {
        self.root.join(format!("{bundle_name}.tgz"))
    }

    /// Lists the Bundle names currently backed by an archive on disk. Used
    /// by the Bundle controller's finalizer sweep (§4.1 "on process restart,
    /// the store scans its directory...") to find archives whose owning
    /// Bundle no longer exists.
    pub async fn list_bundle_names(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    bundle_name: String::new(),
                    source,
                });
            }
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu {
            bundle_name: String::new(),
        })? {
            if let Some(name) = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|_| entry.path().extension().is_some_and(|ext| ext == "tgz"))
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

#[async_trait::async_trait]
impl Store for LocalStore {
    async fn store(&self, bundle_name: &str, archive_fs: &BundleFs) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|_| IoSnafu {
                bundle_name: bundle_name.to_string(),
            })?;
        let bytes = archive_fs.to_tar_gz().with_context(|_| SerializeSnafu {
            bundle_name: bundle_name.to_string(),
        })?;

        // Write-then-rename: readers racing a concurrent write either see
        // the prior archive (still at the final path) or the new one, never
        // a half-written file (§4.1 "Failure semantics").
        let tmp_path = tmp_path(&self.root, bundle_name);
        fs::write(&tmp_path, &bytes)
            .await
            .with_context(|_| IoSnafu {
                bundle_name: bundle_name.to_string(),
            })?;
        set_owner_only_permissions(&tmp_path)
            .await
            .with_context(|_| IoSnafu {
                bundle_name: bundle_name.to_string(),
            })?;
        fs::rename(&tmp_path, self.archive_path(bundle_name))
            .await
            .with_context(|_| IoSnafu {
                bundle_name: bundle_name.to_string(),
            })?;
        Ok(())
    }

    async fn load(&self, bundle_name: &str) -> Result<BundleFs, StoreError> {
        let path = self.archive_path(bundle_name);
        let bytes = fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                NotFoundSnafu {
                    bundle_name: bundle_name.to_string(),
                }
                .build()
            } else {
                StoreError::Io {
                    bundle_name: bundle_name.to_string(),
                    source,
                }
            }
        })?;
        BundleFs::from_tar_gz(&bytes).with_context(|_| SerializeSnafu {
            bundle_name: bundle_name.to_string(),
        })
    }

    async fn delete(&self, bundle_name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.archive_path(bundle_name)).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                bundle_name: bundle_name.to_string(),
                source,
            }),
        }
    }

    fn url(&self, bundle_name: &str) -> String {
        format!(
            "{}/bundles/{bundle_name}.tgz",
            self.external_base_url.trim_end_matches('/')
        )
    }
}

fn tmp_path(root: &Path, bundle_name: &str) -> PathBuf {
    // Random suffix so two concurrent writers for the same name (shouldn't
    // happen under the work-queue's at-most-one-per-name guarantee, but
    // cheap to make safe anyway) don't clobber each other's temp file.
    let suffix: u32 = rand::random();
    root.join(format!(".{bundle_name}.{suffix:08x}.tmp"))
}

#[cfg(unix)]
async fn set_owner_only_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn set_owner_only_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "https://rukpak.example");
        let mut fs = BundleFs::new();
        fs.insert("manifests/a.yaml", b"a: 1".to_vec());

        store.store("my-bundle", &fs).await.unwrap();
        let loaded = store.load("my-bundle").await.unwrap();
        assert_eq!(fs, loaded);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "https://rukpak.example");
        let err = store.load("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "https://rukpak.example");
        store.delete("never-existed").await.unwrap();
        store.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn restore_overwrites_prior_archive() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "https://rukpak.example");
        let mut first = BundleFs::new();
        first.insert("manifests/a.yaml", b"a: 1".to_vec());
        store.store("b", &first).await.unwrap();

        let mut second = BundleFs::new();
        second.insert("manifests/a.yaml", b"a: 2".to_vec());
        store.store("b", &second).await.unwrap();

        assert_eq!(store.load("b").await.unwrap(), second);
    }

    #[tokio::test]
    async fn url_is_built_from_external_base() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "https://rukpak.example/");
        assert_eq!(
            store.url("my-bundle"),
            "https://rukpak.example/bundles/my-bundle.tgz"
        );
    }

    #[tokio::test]
    async fn lists_bundle_names_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "https://rukpak.example");
        let mut fs = BundleFs::new();
        fs.insert("manifests/a.yaml", b"a: 1".to_vec());
        store.store("alpha", &fs).await.unwrap();
        store.store("beta", &fs).await.unwrap();

        let mut names = store.list_bundle_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
