//! Shared types used across the Whisk dispatch crates.
//!
//! Everything that crosses a crate boundary or travels over the message
//! bus lives here: invoker identity, pools, health states, capacity
//! snapshots, and the activation/completion/heartbeat messages.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Topic that invokers publish completion messages to.
pub const COMPLETION_TOPIC: &str = "completed";

/// Topic that invokers publish heartbeats to.
pub const HEALTH_TOPIC: &str = "health";

// ── Invokers ──────────────────────────────────────────────────────

/// Ordinal identifier of an invoker instance.
///
/// Assigned once when the invoker first appears and never reused for a
/// different process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvokerId(pub usize);

impl InvokerId {
    pub fn new(ordinal: usize) -> Self {
        Self(ordinal)
    }

    pub fn ordinal(self) -> usize {
        self.0
    }

    /// Bus partition that activation messages for this invoker go to.
    pub fn topic(self) -> String {
        format!("invoker{}", self.0)
    }
}

impl fmt::Display for InvokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invoker{}", self.0)
    }
}

/// Partition of the invoker fleet by trust level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPool {
    /// Platform-provided runtimes.
    Managed,
    /// Arbitrary user container images.
    Blackbox,
}

impl ActionPool {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionPool::Managed => "managed",
            ActionPool::Blackbox => "blackbox",
        }
    }
}

impl fmt::Display for ActionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of an invoker as derived from its heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokerHealth {
    Healthy,
    Unhealthy,
    Unresponsive,
    Offline,
}

impl InvokerHealth {
    /// Only healthy invokers receive new activations.
    pub fn is_usable(self) -> bool {
        self == InvokerHealth::Healthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvokerHealth::Healthy => "healthy",
            InvokerHealth::Unhealthy => "unhealthy",
            InvokerHealth::Unresponsive => "unresponsive",
            InvokerHealth::Offline => "offline",
        }
    }
}

impl fmt::Display for InvokerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory and container-slot accounting for one invoker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerCapacity {
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
    pub total_slots: u32,
    pub used_slots: u32,
}

impl InvokerCapacity {
    /// A fresh, unused capacity with the given totals.
    pub fn new(total_memory_mb: u64, total_slots: u32) -> Self {
        Self {
            total_memory_mb,
            used_memory_mb: 0,
            total_slots,
            used_slots: 0,
        }
    }
}

/// One row of the operational invoker listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerInfo {
    pub id: InvokerId,
    pub pool: ActionPool,
    pub health: InvokerHealth,
    pub capacity: InvokerCapacity,
    /// Unix millis of the last user activation completed on this invoker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_user_action_ms: Option<u64>,
}

// ── Actions ───────────────────────────────────────────────────────

/// `namespace/name` pair identifying an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FullyQualifiedName {
    pub namespace: String,
    pub name: String,
}

impl FullyQualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FullyQualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for FullyQualifiedName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('/').split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(format!("invalid fully qualified name: {s}")),
        }
    }
}

/// How an action's code is executed, which also decides its pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionExec {
    /// A platform runtime kind such as `python:3` or `nodejs:20`.
    Managed { kind: String },
    /// A user-supplied container image.
    Blackbox { image: String },
}

impl ActionExec {
    pub fn pool(&self) -> ActionPool {
        match self {
            ActionExec::Managed { .. } => ActionPool::Managed,
            ActionExec::Blackbox { .. } => ActionPool::Blackbox,
        }
    }
}

/// Per-action resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLimits {
    /// Memory reserved for each activation, in megabytes.
    pub memory_mb: u64,
    /// Maximum run time of one activation, in milliseconds.
    pub timeout_ms: u64,
}

impl ActionLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ActionLimits {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            timeout_ms: 60_000,
        }
    }
}

/// Action metadata as read from the entity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMetadata {
    pub namespace: String,
    pub name: String,
    pub exec: ActionExec,
    pub limits: ActionLimits,
    /// Unix timestamp (seconds) of the last update.
    #[serde(default)]
    pub updated_at: u64,
}

impl ActionMetadata {
    pub fn fqn(&self) -> FullyQualifiedName {
        FullyQualifiedName::new(&self.namespace, &self.name)
    }

    pub fn pool(&self) -> ActionPool {
        self.exec.pool()
    }

    /// Build the composite key for the actions table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Consistent-hash input for invoker selection.
///
/// Derived from the invoking namespace and the action's fully qualified
/// name, so the same action invoked by the same namespace keeps landing on
/// the same invoker while the fleet is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey {
    pub namespace: String,
    pub action: FullyQualifiedName,
    /// Explicit home invoker ordinal, taken modulo the pool size.
    pub home_hint: Option<usize>,
}

impl RoutingKey {
    pub fn new(namespace: impl Into<String>, action: FullyQualifiedName) -> Self {
        Self {
            namespace: namespace.into(),
            action,
            home_hint: None,
        }
    }

    pub fn with_home_hint(mut self, hint: usize) -> Self {
        self.home_hint = Some(hint);
        self
    }

    /// Stable 64-bit hash (first eight bytes of SHA-256).
    pub fn hash(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(b":");
        hasher.update(self.action.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

// ── Activations ───────────────────────────────────────────────────

/// Unique id of one activation (32 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationId(String);

impl ActivationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActivationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message published to an invoker's partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationMessage {
    pub activation_id: ActivationId,
    /// Namespace of the invoking subject.
    pub namespace: String,
    pub action: FullyQualifiedName,
    pub invoker: InvokerId,
    pub pool: ActionPool,
    pub memory_mb: u64,
    pub blocking: bool,
    /// Action arguments.
    pub content: serde_json::Value,
    /// Unix timestamp (milliseconds) of submission.
    pub submitted_at_ms: u64,
}

/// Completion emitted by an invoker once an activation finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub activation_id: ActivationId,
    pub invoker: InvokerId,
    pub success: bool,
    pub is_system_error: bool,
    /// Action output, forwarded to blocking callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// What an invoker says about itself in a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokerStatus {
    Up,
    ShuttingDown,
}

/// Periodic liveness and capacity report from an invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub invoker: InvokerId,
    pub capacity: InvokerCapacity,
    /// Unix timestamp (milliseconds) when the heartbeat was produced.
    pub timestamp_ms: u64,
    pub status: InvokerStatus,
}

/// Final outcome of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    Success,
    ApplicationError,
    SystemError,
    Timeout,
}

/// Result delivered to a blocking caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ActivationResult {
    pub fn from_completion(completion: &CompletionMessage) -> Self {
        let status = if completion.success {
            ActivationStatus::Success
        } else if completion.is_system_error {
            ActivationStatus::SystemError
        } else {
            ActivationStatus::ApplicationError
        };
        Self {
            activation_id: completion.activation_id.clone(),
            status,
            result: completion.result.clone(),
        }
    }

    pub fn timeout(activation_id: ActivationId) -> Self {
        Self {
            activation_id,
            status: ActivationStatus::Timeout,
            result: None,
        }
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoker_topic_and_display() {
        let id = InvokerId::new(7);
        assert_eq!(id.topic(), "invoker7");
        assert_eq!(id.to_string(), "invoker7");
    }

    #[test]
    fn routing_key_hash_is_stable() {
        let a = RoutingKey::new("guest", FullyQualifiedName::new("guest", "hello"));
        let b = RoutingKey::new("guest", FullyQualifiedName::new("guest", "hello"));
        assert_eq!(a.hash(), b.hash());

        let c = RoutingKey::new("other", FullyQualifiedName::new("guest", "hello"));
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn fqn_parses_with_and_without_leading_slash() {
        let fqn: FullyQualifiedName = "/guest/hello".parse().unwrap();
        assert_eq!(fqn, FullyQualifiedName::new("guest", "hello"));
        let fqn: FullyQualifiedName = "guest/pkg/hello".parse().unwrap();
        assert_eq!(fqn.name, "pkg/hello");
        assert!("hello".parse::<FullyQualifiedName>().is_err());
    }

    #[test]
    fn exec_decides_pool() {
        let managed = ActionExec::Managed { kind: "python:3".into() };
        let blackbox = ActionExec::Blackbox { image: "acme/img".into() };
        assert_eq!(managed.pool(), ActionPool::Managed);
        assert_eq!(blackbox.pool(), ActionPool::Blackbox);
    }

    #[test]
    fn activation_ids_are_unique_hex() {
        let a = ActivationId::generate();
        let b = ActivationId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn result_status_from_completion() {
        let mut completion = CompletionMessage {
            activation_id: ActivationId::from("a1"),
            invoker: InvokerId::new(0),
            success: true,
            is_system_error: false,
            result: None,
        };
        assert_eq!(
            ActivationResult::from_completion(&completion).status,
            ActivationStatus::Success
        );

        completion.success = false;
        assert_eq!(
            ActivationResult::from_completion(&completion).status,
            ActivationStatus::ApplicationError
        );

        completion.is_system_error = true;
        assert_eq!(
            ActivationResult::from_completion(&completion).status,
            ActivationStatus::SystemError
        );
    }

    #[test]
    fn heartbeat_json_shape() {
        let hb = Heartbeat {
            invoker: InvokerId::new(2),
            capacity: InvokerCapacity::new(2048, 16),
            timestamp_ms: 1000,
            status: InvokerStatus::Up,
        };
        let json = serde_json::to_value(hb).unwrap();
        assert_eq!(json["invoker"], 2);
        assert_eq!(json["status"], "up");
        assert_eq!(json["capacity"]["total_memory_mb"], 2048);
    }
}
