//! Upload source unpack (§4.2): no fetch strategy of its own - content
//! already lives in the upload cache (C6), keyed by Bundle name.

use rukpak_crd::source::UploadSource;
use rukpak_crd::ResolvedBundleSource;
use snafu::Snafu;

use super::{UnpackContext, UnpackOutcome};
use crate::upload_cache::UploadCacheError;

#[derive(Snafu, Debug)]
pub enum UploadUnpackError {
    #[snafu(display("failed to read cached upload for bundle {bundle_name:?}"))]
    Cache {
        bundle_name: String,
        source: UploadCacheError,
    },
}

impl crate::error::ReconcilerError for UploadUnpackError {
    fn category(&self) -> &'static str {
        "UploadUnpackFailed"
    }
}

pub async fn unpack(
    ctx: &UnpackContext,
    bundle_name: &str,
) -> Result<UnpackOutcome, UploadUnpackError> {
    match ctx.upload_cache.get(bundle_name).await {
        Ok(fs) => Ok(UnpackOutcome::unpacked(
            fs,
            ResolvedBundleSource::Upload(UploadSource {}),
        )),
        Err(UploadCacheError::NotFound { .. }) => Ok(UnpackOutcome::pending(format!(
            "waiting for content to be uploaded to bundle {bundle_name:?}"
        ))),
        Err(source) => Err(UploadUnpackError::Cache {
            bundle_name: bundle_name.to_string(),
            source,
        }),
    }
}
