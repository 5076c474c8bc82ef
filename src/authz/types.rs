use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::ArbiterError;

/// Lifecycle state of a policy. Exactly one at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Draft,
    Active,
    Archived,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Draft => "draft",
            PolicyStatus::Active => "active",
            PolicyStatus::Archived => "archived",
        }
    }
}

impl FromStr for PolicyStatus {
    type Err = ArbiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PolicyStatus::Draft),
            "active" => Ok(PolicyStatus::Active),
            "archived" => Ok(PolicyStatus::Archived),
            other => Err(ArbiterError::InvalidRequest(format!(
                "unknown policy status `{other}`"
            ))),
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl FromStr for Effect {
    type Err = ArbiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(ArbiterError::InvalidRequest(format!(
                "unknown effect `{other}` (expected \"allow\" or \"deny\")"
            ))),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of subject a policy can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Role,
    User,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Role => "role",
            SubjectType::User => "user",
        }
    }
}

impl FromStr for SubjectType {
    type Err = ArbiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "role" => Ok(SubjectType::Role),
            "user" => Ok(SubjectType::User),
            other => Err(ArbiterError::InvalidRequest(format!(
                "unknown subject type `{other}` (expected \"role\" or \"user\")"
            ))),
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------- Domain read models ----------

/// Policy metadata as exposed to callers. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub id: String,
    pub policy_number: i32,
    pub name: String,
    pub description: Option<String>,
    pub status: PolicyStatus,
    pub revision: i64,
    pub allow_count: i64,
    pub deny_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRule {
    pub id: String,
    pub policy_id: String,
    pub effect: Effect,
    pub resource: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Value>,
    pub seq: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyBinding {
    pub id: String,
    pub policy_id: String,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    /// Lower is more privileged; 0 is the superadmin sentinel.
    pub level: i32,
    pub description: Option<String>,
    pub created_at: i64,
}

/// A user as known to the engine: identity plus role, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub id: String,
    pub role_id: String,
    pub username: Option<String>,
}

/// Outcome of an evaluation. Never persisted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// Everything `evaluate` needs to know about one access attempt.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub subject_id: String,
    /// When `None` the subject's own role from the directory is used.
    pub role_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub context: Value,
}

// ---------- API request types ----------

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub policy_number: i32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddRuleRequest {
    /// "allow" or "deny"
    pub effect: Effect,
    /// Resource name or "*"
    pub resource: String,
    /// Action name or "*"
    pub action: String,
    #[serde(default)]
    pub conditions: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub subject_type: SubjectType,
    pub subject_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub role_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    /// Test user to simulate; falls back to the caller's identity
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub role_id: Option<String>,
    pub action: String,
    pub resource: String,
    /// Flat key/value attributes, e.g. `{"department": "finance"}`
    #[serde(default)]
    pub context: Value,
}
