use arbiter::authz::types::{Effect, Policy, PolicyStatus, SubjectType};
use arbiter::storage::{bindings, policies, rules};
use sea_orm::DatabaseConnection;
use serde_json::Value;

struct RuleSpec {
    effect: Effect,
    resource: String,
    action: String,
    conditions: Option<Value>,
}

/// Builder for creating test policies with rules and bindings
pub struct PolicyBuilder {
    number: i32,
    name: String,
    description: Option<String>,
    rules: Vec<RuleSpec>,
    bindings: Vec<(SubjectType, String)>,
    status: PolicyStatus,
}

impl PolicyBuilder {
    pub fn new(number: i32) -> Self {
        Self {
            number,
            name: format!("Policy {number}"),
            description: None,
            rules: Vec::new(),
            bindings: Vec::new(),
            status: PolicyStatus::Draft,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn allow(self, resource: &str, action: &str) -> Self {
        self.rule(Effect::Allow, resource, action, None)
    }

    pub fn deny(self, resource: &str, action: &str) -> Self {
        self.rule(Effect::Deny, resource, action, None)
    }

    pub fn rule(
        mut self,
        effect: Effect,
        resource: &str,
        action: &str,
        conditions: Option<Value>,
    ) -> Self {
        self.rules.push(RuleSpec {
            effect,
            resource: resource.to_string(),
            action: action.to_string(),
            conditions,
        });
        self
    }

    pub fn bound_to_role(mut self, role_id: &str) -> Self {
        self.bindings.push((SubjectType::Role, role_id.to_string()));
        self
    }

    pub fn bound_to_user(mut self, user_id: &str) -> Self {
        self.bindings.push((SubjectType::User, user_id.to_string()));
        self
    }

    pub fn active(mut self) -> Self {
        self.status = PolicyStatus::Active;
        self
    }

    pub fn archived(mut self) -> Self {
        self.status = PolicyStatus::Archived;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> Policy {
        let policy = policies::create_draft(db, self.number, &self.name, self.description)
            .await
            .expect("Failed to create test policy");

        for rule in self.rules {
            rules::add_rule(
                db,
                &policy.id,
                rule.effect,
                &rule.resource,
                &rule.action,
                rule.conditions,
            )
            .await
            .expect("Failed to add test rule");
        }

        for (subject_type, subject_id) in &self.bindings {
            bindings::bind(db, &policy.id, *subject_type, subject_id)
                .await
                .expect("Failed to bind test policy");
        }

        if matches!(self.status, PolicyStatus::Active | PolicyStatus::Archived) {
            policies::activate(db, &policy.id)
                .await
                .expect("Failed to activate test policy");
        }
        if self.status == PolicyStatus::Archived {
            policies::archive(db, &policy.id)
                .await
                .expect("Failed to archive test policy");
        }

        policies::get(db, &policy.id)
            .await
            .expect("Test policy missing after creation")
    }
}
