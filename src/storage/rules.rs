use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde_json::Value;

use crate::authz::condition::Conditions;
use crate::authz::lifecycle;
use crate::authz::types::{Effect, PolicyRule, PolicyStatus};
use crate::entities::{policy, policy_rule};
use crate::errors::ArbiterError;
use crate::storage::policies::{find_model, guarded_update, rejection};
use crate::storage::{now_millis, random_id};

pub(crate) fn to_rule(model: policy_rule::Model) -> Result<PolicyRule, ArbiterError> {
    let conditions = match model.conditions.as_deref() {
        Some(raw) => Some(serde_json::from_str(raw)?),
        None => None,
    };
    Ok(PolicyRule {
        effect: model.effect.parse()?,
        id: model.id,
        policy_id: model.policy_id,
        resource: model.resource,
        action: model.action,
        conditions,
        seq: model.seq,
        created_at: model.created_at,
    })
}

fn count_column(effect: Effect) -> policy::Column {
    match effect {
        Effect::Allow => policy::Column::AllowCount,
        Effect::Deny => policy::Column::DenyCount,
    }
}

/// Append a rule to a draft policy and bump the matching counter.
pub async fn add_rule(
    db: &DatabaseConnection,
    policy_id: &str,
    effect: Effect,
    resource: &str,
    action: &str,
    conditions: Option<Value>,
) -> Result<PolicyRule, ArbiterError> {
    let resource = resource.trim();
    let action = action.trim();
    if resource.is_empty() || action.is_empty() {
        return Err(ArbiterError::InvalidRequest(
            "resource and action must not be empty (use \"*\" to match any)".into(),
        ));
    }
    let conditions = conditions.filter(|c| !c.is_null());
    if let Some(raw) = &conditions {
        Conditions::compile(raw)?;
    }
    let stored_conditions = conditions.as_ref().map(Value::to_string);

    let txn = db.begin().await?;

    let column = count_column(effect);
    let claimed = guarded_update(policy_id, Some(PolicyStatus::Draft), now_millis())
        .col_expr(column, Expr::col(column).add(1))
        .exec(&txn)
        .await?;
    if claimed.rows_affected == 0 {
        txn.rollback().await?;
        return Err(rejection(db, policy_id, lifecycle::ensure_mutable).await);
    }

    // The bumped revision orders rules added within the same millisecond
    let seq = find_model(&txn, policy_id).await?.revision;
    let created_at = now_millis();
    let model = policy_rule::ActiveModel {
        id: Set(random_id()),
        policy_id: Set(policy_id.to_string()),
        effect: Set(effect.as_str().to_string()),
        resource: Set(resource.to_string()),
        action: Set(action.to_string()),
        conditions: Set(stored_conditions),
        seq: Set(seq),
        created_at: Set(created_at),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    tracing::info!(
        policy_id = %policy_id,
        rule_id = %model.id,
        effect = %effect,
        resource = %resource,
        action = %action,
        "Rule added"
    );
    Ok(PolicyRule {
        id: model.id,
        policy_id: model.policy_id,
        effect,
        resource: model.resource,
        action: model.action,
        conditions,
        seq: model.seq,
        created_at: model.created_at,
    })
}

pub async fn remove_rule(db: &DatabaseConnection, rule_id: &str) -> Result<(), ArbiterError> {
    // A rule never moves between policies, so reading it outside the
    // transaction is safe.
    let rule = policy_rule::Entity::find_by_id(rule_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| ArbiterError::not_found("rule", rule_id))?;
    let effect: Effect = rule.effect.parse()?;

    let txn = db.begin().await?;
    let column = count_column(effect);
    let claimed = guarded_update(&rule.policy_id, Some(PolicyStatus::Draft), now_millis())
        .col_expr(column, Expr::col(column).sub(1))
        .exec(&txn)
        .await?;
    if claimed.rows_affected == 0 {
        txn.rollback().await?;
        return Err(rejection(db, &rule.policy_id, lifecycle::ensure_mutable).await);
    }

    let deleted = policy_rule::Entity::delete_by_id(rule_id.to_string())
        .exec(&txn)
        .await?;
    if deleted.rows_affected == 0 {
        // Removed by a concurrent caller; undo the counter change
        txn.rollback().await?;
        return Err(ArbiterError::not_found("rule", rule_id));
    }
    txn.commit().await?;

    tracing::info!(policy_id = %rule.policy_id, rule_id = %rule_id, "Rule removed");
    Ok(())
}

/// Rules of a policy in definition order. Works for every status.
pub async fn list_rules(
    db: &DatabaseConnection,
    policy_id: &str,
) -> Result<Vec<PolicyRule>, ArbiterError> {
    find_model(db, policy_id).await?;
    list_for_policies(db, &[policy_id.to_string()]).await
}

/// Rules of several policies at once, ordered by (`created_at`, `seq`).
pub(crate) async fn list_for_policies(
    db: &DatabaseConnection,
    policy_ids: &[String],
) -> Result<Vec<PolicyRule>, ArbiterError> {
    if policy_ids.is_empty() {
        return Ok(Vec::new());
    }
    policy_rule::Entity::find()
        .filter(policy_rule::Column::PolicyId.is_in(policy_ids.iter().cloned()))
        .order_by_asc(policy_rule::Column::CreatedAt)
        .order_by_asc(policy_rule::Column::Seq)
        .all(db)
        .await?
        .into_iter()
        .map(to_rule)
        .collect()
}
