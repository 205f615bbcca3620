//! Availability probe evaluation (§4.4.1): checks the checks named in
//! [`rukpak_crd::probe`] against whichever of a BundleDeployment's owned
//! objects match a probe's selector.

use std::collections::BTreeMap;

use cel_interpreter::{Context as CelContext, Program};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use rukpak_crd::probe::{AvailabilityProbe, ProbeCheck};
use snafu::{OptionExt, ResultExt, Snafu};

use super::apply::matches_label_selector;
use super::release::ObjectRef;

#[derive(Snafu, Debug)]
pub enum ProbeError {
    #[snafu(display("failed to fetch {kind} {name:?} for probe evaluation"))]
    Fetch {
        kind: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("CEL expression {expression:?} failed to compile"))]
    CelCompile {
        expression: String,
        source: cel_interpreter::ParseError,
    },

    #[snafu(display("CEL expression {expression:?} failed to evaluate"))]
    CelExecute {
        expression: String,
        source: cel_interpreter::ExecutionError,
    },

    #[snafu(display("field path {field:?} not found on evaluated object"))]
    FieldNotFound { field: String },
}

impl crate::error::ReconcilerError for ProbeError {
    fn category(&self) -> &'static str {
        "Unhealthy"
    }
}

pub struct ProbeResult {
    pub healthy: bool,
    pub message: String,
}

/// Evaluate every probe against the subset of `owned` that matches its
/// selector. A probe set passes iff every matched object satisfies every
/// check and, where it exposes `status.observedGeneration`, that field
/// equals the object's `metadata.generation` (§4.4.1).
pub async fn evaluate(
    client: &Client,
    default_namespace: &str,
    owned: &[ObjectRef],
    probes: &[AvailabilityProbe],
) -> Result<ProbeResult, ProbeError> {
    if probes.is_empty() {
        return Ok(ProbeResult {
            healthy: true,
            message: "no availability probes configured".to_string(),
        });
    }

    for probe in probes {
        for object_ref in owned {
            if object_ref.kind != probe.selector.kind {
                continue;
            }
            let (group, _version) = split_api_version(&object_ref.api_version);
            if group != probe.selector.group {
                continue;
            }

            let object = fetch(client, default_namespace, object_ref).await?;

            if let Some(selector) = &probe.selector.label_selector {
                let labels = object
                    .metadata
                    .labels
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect::<BTreeMap<_, _>>();
                if !matches_label_selector(&labels, selector) {
                    continue;
                }
            }

            for check in &probe.checks {
                if !run_check(check, &object)? {
                    return Ok(ProbeResult {
                        healthy: false,
                        message: format!(
                            "{} {} failed check {:?}",
                            object_ref.kind, object_ref.name, check
                        ),
                    });
                }
            }

            if !observed_generation_current(&object) {
                return Ok(ProbeResult {
                    healthy: false,
                    message: format!(
                        "{} {} has not yet observed its current generation",
                        object_ref.kind, object_ref.name
                    ),
                });
            }
        }
    }

    Ok(ProbeResult {
        healthy: true,
        message: "all probes satisfied".to_string(),
    })
}

async fn fetch(
    client: &Client,
    default_namespace: &str,
    object_ref: &ObjectRef,
) -> Result<DynamicObject, ProbeError> {
    let (group, version) = split_api_version(&object_ref.api_version);
    let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(&group, &version, &object_ref.kind));
    let namespace = object_ref.namespace.as_deref().unwrap_or(default_namespace);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &resource);
    api.get(&object_ref.name).await.context(FetchSnafu {
        kind: object_ref.kind.clone(),
        name: object_ref.name.clone(),
    })
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

fn run_check(check: &ProbeCheck, object: &DynamicObject) -> Result<bool, ProbeError> {
    match check {
        ProbeCheck::Condition { condition_type, status } => Ok(object
            .data
            .pointer("/status/conditions")
            .and_then(|c| c.as_array())
            .is_some_and(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(|v| v.as_str()) == Some(condition_type.as_str())
                        && c.get("status").and_then(|v| v.as_str()) == Some(status.as_str())
                })
            })),
        ProbeCheck::FieldsEqual { field_a, field_b } => {
            let a = field_value(object, field_a)?;
            let b = field_value(object, field_b)?;
            Ok(a == b)
        }
        ProbeCheck::Cel { expression } => evaluate_cel(expression, object),
    }
}

fn field_value<'a>(object: &'a DynamicObject, path: &str) -> Result<&'a serde_json::Value, ProbeError> {
    let pointer = format!("/{}", path.replace('.', "/"));
    object
        .data
        .pointer(&pointer)
        .context(FieldNotFoundSnafu { field: path.to_string() })
}

fn evaluate_cel(expression: &str, object: &DynamicObject) -> Result<bool, ProbeError> {
    let program = Program::compile(expression).context(CelCompileSnafu {
        expression: expression.to_string(),
    })?;
    let mut context = CelContext::default();
    context
        .add_variable_from_value("self", cel_interpreter::Value::from(object.data.clone()));
    let result = program.execute(&context).context(CelExecuteSnafu {
        expression: expression.to_string(),
    })?;
    Ok(matches!(result, cel_interpreter::Value::Bool(true)))
}

/// §4.4.1 "when the object exposes `status.observedGeneration`, the observed
/// generation equals the object's generation".
fn observed_generation_current(object: &DynamicObject) -> bool {
    let Some(observed) = object.data.pointer("/status/observedGeneration") else {
        return true;
    };
    let generation = object.metadata.generation;
    observed.as_i64() == generation
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn dynamic_object(data: serde_json::Value, generation: Option<i64>) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                generation,
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn condition_check_matches_type_and_status() {
        let object = dynamic_object(
            json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}}),
            None,
        );
        let check = ProbeCheck::Condition {
            condition_type: "Ready".to_string(),
            status: "True".to_string(),
        };
        assert!(run_check(&check, &object).unwrap());
    }

    #[test]
    fn fields_equal_check_compares_json_paths() {
        let object = dynamic_object(
            json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 3}}),
            None,
        );
        let check = ProbeCheck::FieldsEqual {
            field_a: "spec.replicas".to_string(),
            field_b: "status.readyReplicas".to_string(),
        };
        assert!(run_check(&check, &object).unwrap());
    }

    #[test]
    fn observed_generation_must_match_when_present() {
        let current = dynamic_object(json!({"status": {"observedGeneration": 2}}), Some(2));
        assert!(observed_generation_current(&current));

        let stale = dynamic_object(json!({"status": {"observedGeneration": 1}}), Some(2));
        assert!(!observed_generation_current(&stale));
    }

    #[test]
    fn missing_observed_generation_is_treated_as_current() {
        let object = dynamic_object(json!({"status": {}}), Some(5));
        assert!(observed_generation_current(&object));
    }
}
