use std::collections::BTreeSet;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

use crate::authz::types::{PolicyBinding, SubjectType};
use crate::entities::policy_binding;
use crate::errors::ArbiterError;
use crate::storage::policies::{find_model, guarded_update};
use crate::storage::{is_unique_violation, now_millis, random_id, subjects};

fn to_binding(model: policy_binding::Model) -> Result<PolicyBinding, ArbiterError> {
    Ok(PolicyBinding {
        subject_type: model.subject_type.parse()?,
        id: model.id,
        policy_id: model.policy_id,
        subject_id: model.subject_id,
        created_at: model.created_at,
    })
}

/// Bind a policy to a role or user. Allowed in every policy status.
pub async fn bind(
    db: &DatabaseConnection,
    policy_id: &str,
    subject_type: SubjectType,
    subject_id: &str,
) -> Result<PolicyBinding, ArbiterError> {
    let subject_id = subject_id.trim();
    if subject_id.is_empty() {
        return Err(ArbiterError::InvalidRequest(
            "subject_id must not be empty".into(),
        ));
    }

    let now = now_millis();
    let txn = db.begin().await?;
    let claimed = guarded_update(policy_id, None, now).exec(&txn).await?;
    if claimed.rows_affected == 0 {
        txn.rollback().await?;
        return Err(ArbiterError::not_found("policy", policy_id));
    }

    let inserted = policy_binding::ActiveModel {
        id: Set(random_id()),
        policy_id: Set(policy_id.to_string()),
        subject_type: Set(subject_type.as_str().to_string()),
        subject_id: Set(subject_id.to_string()),
        created_at: Set(now),
    }
    .insert(&txn)
    .await;
    let model = match inserted {
        Ok(model) => model,
        Err(e) if is_unique_violation(&e) => {
            txn.rollback().await?;
            return Err(ArbiterError::DuplicateBinding {
                policy_id: policy_id.to_string(),
                subject_type: subject_type.to_string(),
                subject_id: subject_id.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    txn.commit().await?;

    tracing::info!(
        policy_id = %policy_id,
        binding_id = %model.id,
        subject_type = %subject_type,
        subject_id = %subject_id,
        "Policy bound"
    );
    to_binding(model)
}

/// Bind a policy to an existing role.
pub async fn assign(
    db: &DatabaseConnection,
    policy_id: &str,
    role_id: &str,
) -> Result<PolicyBinding, ArbiterError> {
    subjects::get_role(db, role_id).await?;
    bind(db, policy_id, SubjectType::Role, role_id).await
}

pub async fn unbind(db: &DatabaseConnection, binding_id: &str) -> Result<(), ArbiterError> {
    let binding = policy_binding::Entity::find_by_id(binding_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| ArbiterError::not_found("binding", binding_id))?;

    let txn = db.begin().await?;
    guarded_update(&binding.policy_id, None, now_millis())
        .exec(&txn)
        .await?;
    let deleted = policy_binding::Entity::delete_by_id(binding_id.to_string())
        .exec(&txn)
        .await?;
    if deleted.rows_affected == 0 {
        txn.rollback().await?;
        return Err(ArbiterError::not_found("binding", binding_id));
    }
    txn.commit().await?;

    tracing::info!(policy_id = %binding.policy_id, binding_id = %binding_id, "Policy unbound");
    Ok(())
}

pub async fn list_bindings_for_policy(
    db: &DatabaseConnection,
    policy_id: &str,
) -> Result<Vec<PolicyBinding>, ArbiterError> {
    find_model(db, policy_id).await?;
    policy_binding::Entity::find()
        .filter(policy_binding::Column::PolicyId.eq(policy_id))
        .order_by_asc(policy_binding::Column::CreatedAt)
        .order_by_asc(policy_binding::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(to_binding)
        .collect()
}

/// Ids of every policy bound to the user directly or to their role,
/// whatever the policy's status.
pub async fn list_applicable_policies(
    db: &DatabaseConnection,
    subject_id: &str,
    role_id: &str,
) -> Result<BTreeSet<String>, ArbiterError> {
    let bound_to_subject = Condition::any()
        .add(
            Condition::all()
                .add(policy_binding::Column::SubjectType.eq(SubjectType::User.as_str()))
                .add(policy_binding::Column::SubjectId.eq(subject_id)),
        )
        .add(
            Condition::all()
                .add(policy_binding::Column::SubjectType.eq(SubjectType::Role.as_str()))
                .add(policy_binding::Column::SubjectId.eq(role_id)),
        );

    let bindings = policy_binding::Entity::find()
        .filter(bound_to_subject)
        .all(db)
        .await?;
    Ok(bindings.into_iter().map(|b| b.policy_id).collect())
}
