//! [`BundleFs`]: the in-memory virtual filesystem passed between the
//! unpacker, storage layer, and renderer (§2 dataflow).
//!
//! Every producer (image unpack, git clone, HTTP fetch, ConfigMaps, upload
//! cache) and every consumer (tar.gz serialization, plain/registry/chart
//! rendering) goes through this one type, so none of them need to agree on
//! an on-disk layout.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use snafu::{OptionExt, ResultExt, Snafu};

/// A content-addressable-free, in-memory directory tree: path (forward-slash
/// separated, no leading `/`) to file bytes. A `BTreeMap` keeps iteration in
/// lexicographic order, which §6 requires of the serialized archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleFs {
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Snafu, Debug)]
pub enum FsError {
    #[snafu(display("failed to build tar archive"))]
    BuildTar { source: std::io::Error },

    #[snafu(display("failed to read tar archive"))]
    ReadTar { source: std::io::Error },

    #[snafu(display("tar entry {path:?} has a non-UTF8 name"))]
    NonUtf8Entry { path: std::path::PathBuf },
}

impl BundleFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the file at `path`. `path` is normalized to strip
    /// any leading `/` so callers don't need to think about it.
    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let path = path.into();
        let path = path.strip_prefix('/').map(str::to_string).unwrap_or(path);
        self.files.insert(path, data.into());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Every file, in the lexicographic order §6 mandates for the serialized
    /// archive.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, d)| (p.as_str(), d.as_slice()))
    }

    /// Every file whose path starts with `prefix/`.
    pub fn files_under(&self, prefix: &str) -> impl Iterator<Item = (&str, &[u8])> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.files
            .iter()
            .filter(move |(p, _)| p.starts_with(&prefix))
            .map(|(p, d)| (p.as_str(), d.as_slice()))
    }

    /// Serialize to tar.gz, in lexicographic order, GNU-format headers with
    /// fixed metadata (mode 0644, mtime 0) so two semantically identical
    /// filesystems produce byte-identical archives (§4.2 idempotence
    /// invariant: "modulo tar metadata timestamps" is satisfied by pinning
    /// them rather than leaving them to vary).
    pub fn to_tar_gz(&self) -> Result<Vec<u8>, FsError> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, data) in self.iter() {
            let mut header = tar::Header::new_gnu();
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_size(data.len() as u64);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder
                .append_data(&mut header, path, data)
                .context(BuildTarSnafu)?;
        }
        builder
            .into_inner()
            .context(BuildTarSnafu)?
            .finish()
            .context(BuildTarSnafu)
    }

    /// Inverse of [`BundleFs::to_tar_gz`].
    pub fn from_tar_gz(bytes: &[u8]) -> Result<Self, FsError> {
        let mut fs = BundleFs::new();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        for entry in archive.entries().context(ReadTarSnafu)? {
            let mut entry = entry.context(ReadTarSnafu)?;
            if entry.header().entry_type() != tar::EntryType::Regular {
                continue;
            }
            let entry_path = entry.path().context(ReadTarSnafu)?.into_owned();
            let path = entry_path
                .to_str()
                .with_context(|| NonUtf8EntrySnafu {
                    path: entry_path.clone(),
                })?
                .to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).context(ReadTarSnafu)?;
            fs.insert(path, data);
        }
        Ok(fs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_tar_gz() {
        let mut fs = BundleFs::new();
        fs.insert("manifests/b.yaml", b"b: 1".to_vec());
        fs.insert("manifests/a.yaml", b"a: 1".to_vec());

        let archive = fs.to_tar_gz().unwrap();
        let restored = BundleFs::from_tar_gz(&archive).unwrap();
        assert_eq!(fs, restored);
    }

    #[test]
    fn iteration_order_is_lexicographic() {
        let mut fs = BundleFs::new();
        fs.insert("z", b"1".to_vec());
        fs.insert("a", b"2".to_vec());
        fs.insert("m", b"3".to_vec());
        let order: Vec<_> = fs.iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec!["a", "m", "z"]);
    }

    #[test]
    fn serialization_is_deterministic() {
        let mut fs = BundleFs::new();
        fs.insert("manifests/a.yaml", b"a: 1".to_vec());
        assert_eq!(fs.to_tar_gz().unwrap(), fs.to_tar_gz().unwrap());
    }

    #[test]
    fn leading_slash_is_stripped() {
        let mut fs = BundleFs::new();
        fs.insert("/manifests/a.yaml", b"a".to_vec());
        assert!(fs.get("manifests/a.yaml").is_some());
    }
}
