//! HTTP source unpack (§4.2): stream an archive over HTTPS, with an
//! optional CA override, verifying gzip decompression.

use rukpak_crd::source::HttpSource;
use rukpak_crd::ResolvedBundleSource;
use snafu::{ResultExt, Snafu};

use super::{UnpackContext, UnpackOutcome};
use crate::fs::BundleFs;

#[derive(Snafu, Debug)]
pub enum HttpUnpackError {
    #[snafu(display("failed to build HTTP client with the configured CA override"))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("certificateData for {url:?} is not valid PEM"))]
    InvalidCertificate { url: String, source: reqwest::Error },

    #[snafu(display("failed to fetch {url:?}"))]
    Fetch { url: String, source: reqwest::Error },

    #[snafu(display("server at {url:?} returned {status}"))]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[snafu(display("failed to read response body from {url:?}"))]
    ReadBody { url: String, source: reqwest::Error },

    #[snafu(display("response body from {url:?} is not a valid gzip archive"))]
    Decompress { url: String, source: crate::fs::FsError },

    #[snafu(display("failed to read credentials secret {secret_name:?}"))]
    ReadAuthSecret {
        secret_name: String,
        source: kube::Error,
    },
}

impl crate::error::ReconcilerError for HttpUnpackError {
    fn category(&self) -> &'static str {
        "HttpUnpackFailed"
    }

    fn is_transient(&self) -> bool {
        matches!(
            self,
            HttpUnpackError::Fetch { .. } | HttpUnpackError::BadStatus { .. }
        )
    }
}

pub async fn unpack(
    ctx: &UnpackContext,
    spec: &HttpSource,
) -> Result<UnpackOutcome, HttpUnpackError> {
    let client = build_client(spec)?;
    let mut request = client.get(&spec.url);

    if let Some(auth) = &spec.auth {
        let secrets: kube::Api<k8s_openapi::api::core::v1::Secret> =
            kube::Api::namespaced(ctx.client.clone(), &ctx.bundle_namespace);
        let secret = secrets
            .get(&auth.secret_name)
            .await
            .context(ReadAuthSecretSnafu {
                secret_name: auth.secret_name.clone(),
            })?;
        let data = secret.data.unwrap_or_default();
        let username = data
            .get("username")
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
            .unwrap_or_default();
        let password = data
            .get("password")
            .map(|v| String::from_utf8_lossy(&v.0).into_owned());
        request = request.basic_auth(username, password);
    }

    let response = request.send().await.context(FetchSnafu {
        url: spec.url.clone(),
    })?;
    if !response.status().is_success() {
        return BadStatusSnafu {
            url: spec.url.clone(),
            status: response.status(),
        }
        .fail();
    }
    let bytes = response.bytes().await.context(ReadBodySnafu {
        url: spec.url.clone(),
    })?;
    let fs = BundleFs::from_tar_gz(&bytes).context(DecompressSnafu {
        url: spec.url.clone(),
    })?;

    Ok(UnpackOutcome::unpacked(
        fs,
        ResolvedBundleSource::Http(spec.clone()),
    ))
}

/// §4.2 "optional CA override": when `certificateData` is set, trust only
/// that PEM bundle for this fetch rather than the system root store -
/// mirrors `rukpak-storage-server`'s own `--bundle-ca-file` client
/// construction (see `storage-server/src/main.rs`), just scoped per-request
/// instead of process-wide since each Bundle may name a different CA.
fn build_client(spec: &HttpSource) -> Result<reqwest::Client, HttpUnpackError> {
    let mut builder = reqwest::Client::builder();
    if let Some(pem) = &spec.certificate_data {
        let certificate =
            reqwest::Certificate::from_pem(pem.as_bytes()).context(InvalidCertificateSnafu {
                url: spec.url.clone(),
            })?;
        builder = builder.add_root_certificate(certificate);
    }
    builder.build().context(BuildClientSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_client_without_certificate_data_succeeds() {
        let spec = HttpSource {
            url: "https://example.com/bundle.tgz".to_string(),
            auth: None,
            certificate_data: None,
        };
        assert!(build_client(&spec).is_ok());
    }

    #[test]
    fn build_client_rejects_malformed_pem() {
        let spec = HttpSource {
            url: "https://example.com/bundle.tgz".to_string(),
            auth: None,
            certificate_data: Some("not a certificate".to_string()),
        };
        let error = build_client(&spec).unwrap_err();
        assert!(matches!(error, HttpUnpackError::InvalidCertificate { .. }));
    }
}
