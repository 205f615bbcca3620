//! The Unpacker (C2, §4.2): resolves a Bundle's source variant into a
//! [`BundleFs`] plus a pinned [`ResolvedBundleSource`].
//!
//! Dispatch over source variants is a plain `match` on the
//! [`rukpak_crd::BundleSource`] tagged union - the "method table" the design
//! notes (§9) describe, just expressed as an enum match rather than a
//! runtime map, since the five variants are closed and known at compile time.

pub mod configmaps;
pub mod git;
pub mod http;
pub mod image;
pub mod upload;
pub mod validate;

use kube::Client;
use rukpak_crd::source::BundleSource;
use rukpak_crd::{BundlePhase, ResolvedBundleSource};
use snafu::Snafu;

use crate::fs::BundleFs;
use crate::unpack::image::ImageUnpackError;

/// Everything a source-variant handler needs that it can't derive from the
/// `BundleSource` itself: cluster access, the provisioner's own namespace
/// for spawning ephemeral workloads, and the upload cache for the `Upload`
/// variant.
#[derive(Clone)]
pub struct UnpackContext {
    pub client: Client,
    pub bundle_namespace: String,
    pub unpack_image: String,
    pub upload_cache: crate::upload_cache::UploadCacheHandle,
}

/// The outcome of one `Unpack` call (§4.2 contract). `state` mirrors
/// [`BundlePhase`] directly: the Bundle controller copies it onto
/// `Bundle.status.phase` more or less verbatim.
pub struct UnpackOutcome {
    pub phase: BundlePhase,
    pub fs: Option<BundleFs>,
    pub resolved_source: Option<ResolvedBundleSource>,
    pub message: String,
}

impl UnpackOutcome {
    fn pending(message: impl Into<String>) -> Self {
        Self {
            phase: BundlePhase::Pending,
            fs: None,
            resolved_source: None,
            message: message.into(),
        }
    }

    fn unpacking(message: impl Into<String>) -> Self {
        Self {
            phase: BundlePhase::Unpacking,
            fs: None,
            resolved_source: None,
            message: message.into(),
        }
    }

    fn failing(message: impl Into<String>) -> Self {
        Self {
            phase: BundlePhase::Failing,
            fs: None,
            resolved_source: None,
            message: message.into(),
        }
    }

    fn unpacked(fs: BundleFs, resolved_source: ResolvedBundleSource) -> Self {
        Self {
            phase: BundlePhase::Unpacked,
            fs: Some(fs),
            resolved_source: Some(resolved_source),
            message: "unpack successful".to_string(),
        }
    }
}

#[derive(Snafu, Debug)]
pub enum UnpackError {
    #[snafu(display("image unpack failed"), context(false))]
    Image { source: ImageUnpackError },

    #[snafu(display("git unpack failed"), context(false))]
    Git { source: git::GitUnpackError },

    #[snafu(display("http unpack failed"), context(false))]
    Http { source: http::HttpUnpackError },

    #[snafu(display("config map unpack failed"), context(false))]
    ConfigMaps {
        source: configmaps::ConfigMapUnpackError,
    },

    #[snafu(display("upload unpack failed"), context(false))]
    Upload { source: upload::UploadUnpackError },
}

impl crate::error::ReconcilerError for UnpackError {
    fn category(&self) -> &'static str {
        match self {
            UnpackError::Image { .. } => "ImageUnpackFailed",
            UnpackError::Git { .. } => "GitUnpackFailed",
            UnpackError::Http { .. } => "HttpUnpackFailed",
            UnpackError::ConfigMaps { .. } => "ConfigMapUnpackFailed",
            UnpackError::Upload { .. } => "UploadUnpackFailed",
        }
    }
}

/// Resolve+fetch+materialize one Bundle's content (§4.2 contract). On
/// success the caller (the Bundle controller) still needs to run the
/// `manifests/` structural check via [`validate`] before declaring
/// `Unpacked=True` for the `plain` provisioner class - this function only
/// fetches bytes, it doesn't know the consuming provisioner class.
pub async fn unpack(
    ctx: &UnpackContext,
    bundle_name: &str,
    bundle_uid: Option<&str>,
    source: &BundleSource,
) -> Result<UnpackOutcome, UnpackError> {
    match source {
        BundleSource::Image(spec) => Ok(image::unpack(ctx, bundle_name, bundle_uid, spec).await?),
        BundleSource::Git(spec) => Ok(git::unpack(spec).await?),
        BundleSource::Http(spec) => Ok(http::unpack(ctx, spec).await?),
        BundleSource::ConfigMaps(specs) => Ok(configmaps::unpack(ctx, specs).await?),
        BundleSource::Upload(_) => Ok(upload::unpack(ctx, bundle_name).await?),
    }
}
