//! The loader-only fallback a non-leader process uses to reach the leader's
//! [`super::local::LocalStore`] over HTTP (§4.1, §5 "Shared-resource policy").

use reqwest::Client;
use snafu::ResultExt;

use super::{NotFoundSnafu, Store, StoreError, TransportSnafu};
use crate::fs::BundleFs;

pub struct RemoteLoader {
    client: Client,
    leader_base_url: String,
    bearer_token: String,
}

impl RemoteLoader {
    pub fn new(client: Client, leader_base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            client,
            leader_base_url: leader_base_url.into(),
            bearer_token: bearer_token.into(),
        }
    }
}

#[async_trait::async_trait]
impl Store for RemoteLoader {
    async fn store(&self, _bundle_name: &str, _fs: &BundleFs) -> Result<(), StoreError> {
        // Writes are always routed to the leader via the orchestrator API
        // (§9 "Global mutable state"); a follower never writes locally.
        unreachable!("RemoteLoader is read-only; writes go through the orchestrator API, not storage directly")
    }

    async fn load(&self, bundle_name: &str) -> Result<BundleFs, StoreError> {
        let response = self
            .client
            .get(self.url(bundle_name))
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .with_context(|_| TransportSnafu {
                bundle_name: bundle_name.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return NotFoundSnafu {
                bundle_name: bundle_name.to_string(),
            }
            .fail();
        }
        let response = response.error_for_status().with_context(|_| TransportSnafu {
            bundle_name: bundle_name.to_string(),
        })?;
        let bytes = response.bytes().await.with_context(|_| TransportSnafu {
            bundle_name: bundle_name.to_string(),
        })?;
        BundleFs::from_tar_gz(&bytes).map_err(|source| StoreError::Serialize {
            bundle_name: bundle_name.to_string(),
            source,
        })
    }

    async fn delete(&self, _bundle_name: &str) -> Result<(), StoreError> {
        unreachable!("RemoteLoader is read-only")
    }

    fn url(&self, bundle_name: &str) -> String {
        format!(
            "{}/bundles/{bundle_name}.tgz",
            self.leader_base_url.trim_end_matches('/')
        )
    }
}
