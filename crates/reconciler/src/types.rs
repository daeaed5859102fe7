//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Namespace the resource lives in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Resource name, unique within the namespace.
    pub name: String,
}

impl ResourceKey {
    /// Create a new resource key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a key in the `default` namespace.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(default_namespace(), name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Identifier of a backend record. Generated by the backend, never by us.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    /// Wrap a backend-generated identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BackendId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for BackendId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Desired attributes of a user. Owned by the declaring client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub address: String,
    pub email: String,
}

/// Observed lifecycle state of a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    /// Never touched by the loop.
    #[default]
    #[serde(rename = "", alias = "UNSET")]
    Unset,
    /// A create is in flight or must be resumed.
    #[serde(rename = "CREATING")]
    Creating,
    /// Backend record exists and is recorded in status.
    #[serde(rename = "READY")]
    Ready,
    /// The last create attempt failed.
    #[serde(rename = "FAILED")]
    Failed,
}

impl ResourceState {
    /// Check if transition to target state is valid.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        use ResourceState::{Creating, Failed, Ready, Unset};
        matches!(
            (self, target),
            (Unset | Failed, Creating)
                // resumed or retried creates persist straight from these
                | (Unset | Creating | Failed, Ready)
                | (Creating, Failed)
                // drift detected on a ready resource
                | (Ready, Creating)
        )
    }

    /// Label used in logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Creating => "CREATING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a resource. Owned exclusively by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub state: ResourceState,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "uuid")]
    pub backend_id: Option<BackendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
}

impl ResourceStatus {
    /// Status of a resource the loop has never seen.
    #[must_use]
    pub fn unset() -> Self {
        Self::default()
    }

    /// Status with a given state and optional backend id.
    #[must_use]
    pub const fn new(state: ResourceState, backend_id: Option<BackendId>) -> Self {
        Self {
            state,
            backend_id,
            last_verified: None,
        }
    }

    /// Whether the resource is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ResourceState::Ready
    }
}

/// The unit of reconciliation: declared spec plus observed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    #[serde(flatten)]
    pub key: ResourceKey,
    pub spec: UserSpec,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub resource_version: u64,
}

impl ManagedResource {
    /// Create a resource with an unset status.
    #[must_use]
    pub fn new(key: ResourceKey, spec: UserSpec) -> Self {
        Self {
            key,
            spec,
            status: ResourceStatus::unset(),
            resource_version: 0,
        }
    }

    /// Replace the status.
    #[must_use]
    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }
}

/// Fields sent to the backend on create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserRecord {
    /// Identity of the resource that owns this record.
    pub owner: ResourceKey,
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub address: String,
    pub email: String,
}

impl NewUserRecord {
    /// Build the create payload for a resource.
    #[must_use]
    pub fn from_resource(resource: &ManagedResource) -> Self {
        let spec = &resource.spec;
        Self {
            owner: resource.key.clone(),
            first_name: spec.first_name.clone(),
            last_name: spec.last_name.clone(),
            age: spec.age,
            address: spec.address.clone(),
            email: spec.email.clone(),
        }
    }
}

/// A persisted user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: BackendId,
    pub owner: ResourceKey,
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub address: String,
    pub email: String,
}

impl UserRecord {
    /// Attach a backend id to a create payload.
    #[must_use]
    pub fn from_new(id: BackendId, record: NewUserRecord) -> Self {
        Self {
            id,
            owner: record.owner,
            first_name: record.first_name,
            last_name: record.last_name,
            age: record.age,
            address: record.address,
            email: record.email,
        }
    }
}

/// Re-trigger directive returned to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Do not re-trigger; the resource is gone.
    Never,
    /// Re-trigger right away so the next pass observes fresh state.
    Immediately,
    /// Re-trigger after an idle interval to catch drift.
    After(Duration),
}

impl fmt::Display for Requeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "none"),
            Self::Immediately => write!(f, "immediate"),
            Self::After(d) => write!(f, "after {}s", d.as_secs()),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
)]
mod tests {
    use super::*;

    fn mike() -> UserSpec {
        UserSpec {
            first_name: "Mike".to_string(),
            last_name: "Davidson".to_string(),
            age: 34,
            address: "Here St, 1234".to_string(),
            email: "mike@x.com".to_string(),
        }
    }

    #[test]
    fn test_resource_key_display() {
        assert_eq!(ResourceKey::new("ns", "u1").to_string(), "ns/u1");
        assert_eq!(ResourceKey::named("u1").namespace, "default");
    }

    #[test]
    fn test_state_transitions() {
        use ResourceState::{Creating, Failed, Ready, Unset};
        assert!(Unset.can_transition_to(Creating));
        assert!(Creating.can_transition_to(Ready));
        assert!(Creating.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Creating));
        assert!(Ready.can_transition_to(Creating));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Ready.can_transition_to(Unset));
        assert!(!Failed.can_transition_to(Unset));
    }

    #[test]
    fn test_new_record_carries_spec_and_owner() {
        let resource = ManagedResource::new(ResourceKey::named("u1"), mike());
        let record = NewUserRecord::from_resource(&resource);
        assert_eq!(record.owner, resource.key);
        assert_eq!(record.first_name, "Mike");
        assert_eq!(record.age, 34);
    }

    #[test]
    fn test_status_yaml_uses_crd_labels() {
        let status = ResourceStatus::new(ResourceState::Ready, Some(BackendId::from("abc")));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "READY");
        assert_eq!(json["backendId"], "abc");

        let unset: ResourceStatus = serde_json::from_str(r#"{"state": ""}"#).unwrap();
        assert_eq!(unset.state, ResourceState::Unset);

        let legacy: ResourceStatus =
            serde_json::from_str(r#"{"state": "CREATING", "uuid": "x"}"#).unwrap();
        assert_eq!(legacy.backend_id, Some(BackendId::from("x")));
    }

    #[test]
    fn test_resource_without_status_defaults_to_unset() {
        let json = r#"{
            "name": "u1",
            "spec": {
                "firstName": "Mike",
                "lastName": "Davidson",
                "age": 34,
                "address": "Here St, 1234",
                "email": "mike@x.com"
            }
        }"#;
        let resource: ManagedResource = serde_json::from_str(json).unwrap();
        assert_eq!(resource.key, ResourceKey::named("u1"));
        assert_eq!(resource.status, ResourceStatus::unset());
        assert_eq!(resource.spec, mike());
    }

    #[test]
    fn test_requeue_display() {
        assert_eq!(Requeue::Never.to_string(), "none");
        assert_eq!(Requeue::After(Duration::from_secs(15)).to_string(), "after 15s");
    }
}
