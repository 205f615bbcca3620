//! Availability probes (§4.4.1): the rules the Install Engine evaluates
//! against a `BundleDeployment`'s owned objects to decide `Healthy`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityProbe {
    pub selector: ProbeSelector,
    pub checks: Vec<ProbeCheck>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSelector {
    pub group: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum ProbeCheck {
    /// Object carries a status condition of (`condition_type`, `status`).
    Condition { condition_type: String, status: String },
    /// Two JSON-path fields on the object hold deep-equal values.
    FieldsEqual { field_a: String, field_b: String },
    /// A CEL expression, evaluated with the object bound to `self`, is `true`.
    Cel { expression: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_check_tagging_round_trips() {
        let check = ProbeCheck::Cel {
            expression: "self.status.phase == 'Running'".into(),
        };
        let json = serde_json::to_string(&check).unwrap();
        assert!(json.contains("\"type\":\"Cel\""));
        let back: ProbeCheck = serde_json::from_str(&json).unwrap();
        assert_eq!(back, check);
    }
}
