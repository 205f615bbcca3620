//! Helpers around [`k8s_openapi`]'s generic `Condition` type.
//!
//! The teacher repo leans on `stackable_operator::status::condition::ClusterCondition`
//! for this; we don't carry that dependency, so this module plays the same
//! role directly on top of `k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use std::fmt;

/// The three condition types surfaced on [`crate::Bundle`] (§6).
pub mod bundle_condition {
    pub const UNPACKED: &str = "Unpacked";
}

/// The three condition types surfaced on [`crate::BundleDeployment`] (§6).
pub mod bundle_deployment_condition {
    pub const HAS_VALID_BUNDLE: &str = "HasValidBundle";
    pub const INSTALLED: &str = "Installed";
    pub const HEALTHY: &str = "Healthy";
}

/// Condition reasons named in §6/§7. Kept as a flat list of `&str` constants
/// (rather than a closed enum) because conditions are Kubernetes API surface:
/// new reasons must be additive without breaking existing consumers.
pub mod reason {
    pub const UNPACK_PENDING: &str = "UnpackPending";
    pub const UNPACKING: &str = "Unpacking";
    pub const UNPACK_SUCCESSFUL: &str = "UnpackSuccessful";
    pub const UNPACK_FAILED: &str = "UnpackFailed";
    pub const PROCESSING_FINALIZER_FAILED: &str = "ProcessingFinalizerFailed";

    pub const BUNDLE_LOAD_FAILED: &str = "BundleLoadFailed";
    pub const INSTALL_FAILED: &str = "InstallFailed";
    pub const UPGRADE_FAILED: &str = "UpgradeFailed";
    pub const INSTALLATION_SUCCEEDED: &str = "InstallationSucceeded";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const HEALTHY: &str = "Healthy";
    pub const UNHEALTHY: &str = "Unhealthy";
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        })
    }
}

/// Build (or update in place) a condition of the given `type_` within `conditions`,
/// bumping `observed_generation` and only touching `last_transition_time` when the
/// status actually changed — mirrors the usual Kubernetes condition-setting contract.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
    now: Time,
) {
    let message = message.into();
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let status_changed = existing.status != status.to_string();
        existing.reason = reason.to_string();
        existing.message = message;
        existing.observed_generation = observed_generation;
        if status_changed {
            existing.status = status.to_string();
            existing.last_transition_time = now;
        }
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message,
            observed_generation,
            last_transition_time: now,
        });
    }
}

/// Look up a condition's status by type, if present.
pub fn condition_status(conditions: &[Condition], type_: &str) -> Option<ConditionStatus> {
    conditions.iter().find(|c| c.type_ == type_).map(|c| {
        match c.status.as_str() {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    })
}

/// `true` iff the named condition is present with status `True`.
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    condition_status(conditions, type_) == Some(ConditionStatus::True)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Time {
        Time(chrono_stub())
    }

    // Avoid pulling in `chrono` just for a test timestamp; `Time` wraps it,
    // so build the smallest valid instant directly.
    fn chrono_stub() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
        k8s_openapi::chrono::DateTime::UNIX_EPOCH
    }

    #[test]
    fn sets_new_condition() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            bundle_condition::UNPACKED,
            ConditionStatus::False,
            reason::UNPACK_FAILED,
            "found zero objects",
            Some(1),
            now(),
        );
        assert_eq!(conditions.len(), 1);
        assert!(!is_true(&conditions, bundle_condition::UNPACKED));
    }

    #[test]
    fn transition_time_only_moves_on_status_change() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            bundle_condition::UNPACKED,
            ConditionStatus::Unknown,
            reason::UNPACK_PENDING,
            "pending",
            Some(1),
            now(),
        );
        let first_transition = conditions[0].last_transition_time.clone();

        set_condition(
            &mut conditions,
            bundle_condition::UNPACKED,
            ConditionStatus::Unknown,
            reason::UNPACKING,
            "unpacking",
            Some(2),
            now(),
        );
        assert_eq!(conditions[0].last_transition_time, first_transition);
        assert_eq!(conditions[0].reason, reason::UNPACKING);

        set_condition(
            &mut conditions,
            bundle_condition::UNPACKED,
            ConditionStatus::True,
            reason::UNPACK_SUCCESSFUL,
            "done",
            Some(2),
            now(),
        );
        assert_eq!(conditions[0].status, "True");
    }
}
