//! Content Storage (C1, §4.1): durable, content-addressable persistence of
//! unpacked bundle archives plus an HTTP fetch surface.
//!
//! Two implementations share the [`Store`] trait: [`local::LocalStore`] is
//! the writer/reader used by the leader process; [`remote::RemoteLoader`] is
//! the loader-only fallback non-leader processes use to reach the leader
//! over HTTP. [`http`] mounts the serving layer both implementations sit
//! behind.

pub mod auth;
pub mod http;
pub mod leader_aware;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use snafu::Snafu;

use crate::fs::BundleFs;

#[derive(Snafu, Debug)]
pub enum StoreError {
    #[snafu(display("no archive stored for bundle {bundle_name:?}"))]
    NotFound { bundle_name: String },

    #[snafu(display("failed to read archive for bundle {bundle_name:?}"))]
    Io {
        bundle_name: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to serialize archive for bundle {bundle_name:?}"))]
    Serialize {
        bundle_name: String,
        source: crate::fs::FsError,
    },

    #[snafu(display("failed to fetch archive for bundle {bundle_name:?} from peer"))]
    Transport {
        bundle_name: String,
        source: reqwest::Error,
    },
}

impl crate::error::ReconcilerError for StoreError {
    fn category(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NotFound",
            StoreError::Io { .. } | StoreError::Serialize { .. } => "StorageIo",
            StoreError::Transport { .. } => "StorageTransport",
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transport { .. })
    }
}

/// The storage contract of §4.1. `bundle_name` keys are the Bundle's API
/// object name; implementations never see namespaces, since Bundles are
/// cluster-scoped (§3).
#[async_trait]
pub trait Store: Send + Sync {
    /// Serialize `fs` and atomically replace the prior archive for `bundle_name`.
    async fn store(&self, bundle_name: &str, fs: &BundleFs) -> Result<(), StoreError>;

    /// Load the archive for `bundle_name`, if one exists.
    async fn load(&self, bundle_name: &str) -> Result<BundleFs, StoreError>;

    /// Idempotent: succeeds whether or not an archive existed.
    async fn delete(&self, bundle_name: &str) -> Result<(), StoreError>;

    /// The externally reachable URL clients should `GET` (with a bearer
    /// token) to fetch this bundle's archive.
    fn url(&self, bundle_name: &str) -> String;
}
