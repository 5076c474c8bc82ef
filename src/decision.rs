//! Read-only decision path: resolve the subject, load the active policies
//! bound to it and hand them to the engine.

use std::collections::HashMap;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

use crate::authz::engine::{self, CandidatePolicy, Target};
use crate::authz::types::{AccessRequest, Decision, PolicyStatus};
use crate::entities::policy;
use crate::errors::ArbiterError;
use crate::settings::Storage as RetryCfg;
use crate::storage::{self, bindings, policies, rules, subjects};

pub async fn evaluate(
    db: &DatabaseConnection,
    retry: &RetryCfg,
    request: &AccessRequest,
) -> Result<Decision, ArbiterError> {
    let action = request.action.trim();
    let resource = request.resource.trim();
    if action.is_empty() || resource.is_empty() {
        return Err(ArbiterError::InvalidRequest(
            "action and resource must not be empty".into(),
        ));
    }
    let context = engine::context_map(&request.context)?;

    let (subject, role) = storage::with_retry(retry, "resolve_subject", || {
        subjects::resolve_subject(db, &request.subject_id, request.role_id.as_deref())
    })
    .await?;

    let candidates = storage::with_retry(retry, "load_candidates", || {
        load_candidates(db, &subject.id, &role.id)
    })
    .await?;

    let decision = engine::decide(
        &candidates,
        &Target {
            action,
            resource,
            context: &context,
        },
    );
    tracing::debug!(
        subject_id = %subject.id,
        role_id = %role.id,
        action,
        resource,
        candidates = candidates.len(),
        allowed = decision.allowed,
        policy_id = ?decision.policy_id,
        "Access evaluated"
    );
    Ok(decision)
}

/// Active policies bound to the user or the role, each with its rules.
async fn load_candidates(
    db: &DatabaseConnection,
    subject_id: &str,
    role_id: &str,
) -> Result<Vec<CandidatePolicy>, ArbiterError> {
    let ids = bindings::list_applicable_policies(db, subject_id, role_id).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let active = policy::Entity::find()
        .filter(policy::Column::Id.is_in(ids))
        .filter(policy::Column::Status.eq(PolicyStatus::Active.as_str()))
        .all(db)
        .await?;
    let active_ids: Vec<String> = active.iter().map(|p| p.id.clone()).collect();

    let mut rules_by_policy: HashMap<String, Vec<_>> = HashMap::new();
    for rule in rules::list_for_policies(db, &active_ids).await? {
        rules_by_policy
            .entry(rule.policy_id.clone())
            .or_default()
            .push(rule);
    }

    active
        .into_iter()
        .map(|model| {
            let rules = rules_by_policy.remove(&model.id).unwrap_or_default();
            Ok(CandidatePolicy::new(policies::to_policy(model)?, rules))
        })
        .collect()
}
