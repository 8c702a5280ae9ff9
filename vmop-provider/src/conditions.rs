//! Status conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    #[serde(rename = "VirtualMachineCreated")]
    Created,
    #[serde(rename = "VirtualMachineClassReady")]
    ClassReady,
    #[serde(rename = "VirtualMachineImageReady")]
    ImageReady,
    #[serde(rename = "VirtualMachineResourcePolicyReady")]
    ResourcePolicyReady,
    #[serde(rename = "VirtualMachineBootstrapReady")]
    BootstrapReady,
    #[serde(rename = "VirtualMachineStorageReady")]
    StorageReady,
    #[serde(rename = "VirtualMachineNetworkReady")]
    NetworkReady,
    #[serde(rename = "VirtualMachinePlacementReady")]
    PlacementReady,
    #[serde(rename = "VirtualMachineTools")]
    ToolsRunning,
    #[serde(rename = "GuestCustomization")]
    GuestCustomization,
    #[serde(rename = "GuestBootstrap")]
    GuestBootstrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Insert or update the condition of type `type_`.
///
/// `last_transition_time` only moves when the status changes.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
) {
    let reason = reason.into();
    let message = message.into();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = Utc::now();
        }
        existing.status = status;
        existing.reason = reason;
        existing.message = message;
        return;
    }

    conditions.push(Condition {
        type_,
        status,
        reason,
        message,
        last_transition_time: Utc::now(),
    });
}

pub fn mark_true(conditions: &mut Vec<Condition>, type_: ConditionType) {
    upsert_condition(conditions, type_, ConditionStatus::True, "True", "");
}

pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    reason: impl Into<String>,
    message: impl Into<String>,
) {
    upsert_condition(conditions, type_, ConditionStatus::False, reason, message);
}

pub fn mark_unknown(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    reason: impl Into<String>,
    message: impl Into<String>,
) {
    upsert_condition(conditions, type_, ConditionStatus::Unknown, reason, message);
}

pub fn remove_condition(conditions: &mut Vec<Condition>, type_: ConditionType) {
    conditions.retain(|c| c.type_ != type_);
}

pub fn get_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: ConditionType) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_upsert_inserts() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, ConditionType::ClassReady, "NotFound", "missing");
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].reason, "NotFound");
    }

    #[test]
    fn test_upsert_keeps_transition_time_when_status_unchanged() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, ConditionType::ClassReady, "NotFound", "a");
        let past = Utc::now() - Duration::hours(1);
        conditions[0].last_transition_time = past;

        mark_false(&mut conditions, ConditionType::ClassReady, "NotReady", "b");
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, past);
        assert_eq!(conditions[0].reason, "NotReady");
        assert_eq!(conditions[0].message, "b");
    }

    #[test]
    fn test_upsert_moves_transition_time_on_status_change() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, ConditionType::ImageReady, "NotReady", "");
        let past = Utc::now() - Duration::hours(1);
        conditions[0].last_transition_time = past;

        mark_true(&mut conditions, ConditionType::ImageReady);
        assert!(conditions[0].last_transition_time > past);
        assert!(is_true(&conditions, ConditionType::ImageReady));
    }

    #[test]
    fn test_remove_condition() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, ConditionType::Created);
        mark_unknown(&mut conditions, ConditionType::ToolsRunning, "NoGuestInfo", "");
        remove_condition(&mut conditions, ConditionType::Created);
        assert!(get_condition(&conditions, ConditionType::Created).is_none());
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_condition_serializes_type_name() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, ConditionType::PlacementReady);
        let json = serde_json::to_value(&conditions[0]).unwrap();
        assert_eq!(json["type"], "VirtualMachinePlacementReady");
        assert_eq!(json["status"], "True");
    }
}
