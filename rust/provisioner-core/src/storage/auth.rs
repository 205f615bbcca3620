//! The orchestrator-backed [`TokenAuthorizer`](super::http::TokenAuthorizer):
//! validates a bearer token via a `TokenReview`, then checks a verb on the
//! named Bundle via a `SubjectAccessReview` (§4.1 "Access control is
//! delegated to the orchestrator"; §4.6 applies the same check with `update`
//! for the upload server).

use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use kube::Client;

use super::http::{AuthError, TokenAuthorizer};

/// Checks bearer tokens against a fixed verb on the `bundles` resource.
/// `rukpak-storage-server` constructs one with `"get"`; `rukpak-upload-server`
/// constructs one with `"update"`.
pub struct KubeTokenAuthorizer {
    client: Client,
    verb: &'static str,
}

impl KubeTokenAuthorizer {
    pub fn reader(client: Client) -> Self {
        Self { client, verb: "get" }
    }

    pub fn updater(client: Client) -> Self {
        Self {
            client,
            verb: "update",
        }
    }
}

#[async_trait::async_trait]
impl TokenAuthorizer for KubeTokenAuthorizer {
    async fn authorize_read(&self, bundle_name: &str, token: &str) -> Result<(), AuthError> {
        let reviews: Api<TokenReview> = Api::all(self.client.clone());
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let review = reviews
            .create(&PostParams::default(), &review)
            .await
            .map_err(|_| AuthError::Unauthenticated)?;
        let status = review.status.ok_or(AuthError::Unauthenticated)?;
        if !status.authenticated.unwrap_or(false) {
            return Err(AuthError::Unauthenticated);
        }
        let user = status.user.ok_or(AuthError::Unauthenticated)?;

        let sars: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let sar = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: user.username,
                groups: user.groups,
                resource_attributes: Some(ResourceAttributes {
                    group: Some(rukpak_crd::GROUP.to_string()),
                    resource: Some("bundles".to_string()),
                    name: Some(bundle_name.to_string()),
                    verb: Some(self.verb.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let sar = sars
            .create(&PostParams::default(), &sar)
            .await
            .map_err(|_| AuthError::Forbidden)?;
        if sar.status.is_some_and(|s| s.allowed) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}
