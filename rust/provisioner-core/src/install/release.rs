//! Release records (§3 "Release"): the state record the Install Engine
//! maintains per BundleDeployment, stored out-of-band in the target cluster
//! as a structured [`Secret`].

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;

use super::FIELD_MANAGER;

const RELEASE_DATA_KEY: &str = "release";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseStatus {
    Pending,
    Deployed,
    Failed,
    Superseded,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRecord {
    pub manifest_hash: String,
    pub revision: u32,
    pub status: ReleaseStatus,
    pub objects: Vec<ObjectRef>,
}

#[derive(Snafu, Debug)]
pub enum ReleaseError {
    #[snafu(display("failed to read release secret {name:?}"))]
    Get {
        name: String,
        source: kube::Error,
    },

    #[snafu(display("failed to write release secret {name:?}"))]
    Put {
        name: String,
        source: kube::Error,
    },

    #[snafu(display("release secret {name:?} has no {RELEASE_DATA_KEY} key"))]
    MissingData { name: String },

    #[snafu(display("failed to decode release record in secret {name:?}"))]
    Decode {
        name: String,
        source: serde_json::Error,
    },
}

impl crate::error::ReconcilerError for ReleaseError {
    fn category(&self) -> &'static str {
        "InstallFailed"
    }

    fn is_transient(&self) -> bool {
        matches!(self, ReleaseError::Get { .. } | ReleaseError::Put { .. })
    }
}

fn secret_name(deployment_name: &str) -> String {
    format!("{deployment_name}-release")
}

pub async fn get_release(
    client: &Client,
    namespace: &str,
    deployment_name: &str,
) -> Result<Option<ReleaseRecord>, ReleaseError> {
    let name = secret_name(deployment_name);
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match api.get_opt(&name).await.context(GetSnafu { name: name.clone() })? {
        Some(secret) => secret,
        None => return Ok(None),
    };

    let data = secret.data.unwrap_or_default();
    let raw = data
        .get(RELEASE_DATA_KEY)
        .with_context(|| MissingDataSnafu { name: name.clone() })?;
    let record = serde_json::from_slice(&raw.0).context(DecodeSnafu { name })?;
    Ok(Some(record))
}

pub async fn put_release(
    client: &Client,
    namespace: &str,
    deployment_name: &str,
    record: &ReleaseRecord,
) -> Result<(), ReleaseError> {
    let name = secret_name(deployment_name);
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let mut data = BTreeMap::new();
    data.insert(
        RELEASE_DATA_KEY.to_string(),
        ByteString(serde_json::to_vec(record).expect("ReleaseRecord always serializes")),
    );

    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    if api.get_opt(&name).await.context(GetSnafu { name: name.clone() })?.is_some() {
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
        .context(PutSnafu { name })?;
    } else {
        api.create(&PostParams::default(), &secret)
            .await
            .context(PutSnafu { name })?;
    }
    Ok(())
}
