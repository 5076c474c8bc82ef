use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, UpdateMany,
};

use crate::authz::lifecycle::{self, Transition};
use crate::authz::types::{Policy, PolicyStatus, SubjectType};
use crate::entities::{policy, policy_binding, policy_rule};
use crate::errors::ArbiterError;
use crate::storage::{is_unique_violation, now_millis, random_id};

pub(crate) fn to_policy(model: policy::Model) -> Result<Policy, ArbiterError> {
    Ok(Policy {
        status: model.status.parse()?,
        id: model.id,
        policy_number: model.policy_number,
        name: model.name,
        description: model.description,
        revision: model.revision,
        allow_count: model.allow_count,
        deny_count: model.deny_count,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

/// Update of one policy row that bumps its revision and `updated_at`.
///
/// With `status` set, the row only matches while the policy is in that
/// state. Callers add their own column changes, execute it as the first
/// statement of their transaction and treat zero affected rows as a
/// rejection (see [`rejection`]).
pub(crate) fn guarded_update(
    id: &str,
    status: Option<PolicyStatus>,
    now: i64,
) -> UpdateMany<policy::Entity> {
    let update = policy::Entity::update_many()
        .col_expr(
            policy::Column::Revision,
            Expr::col(policy::Column::Revision).add(1),
        )
        .col_expr(policy::Column::UpdatedAt, Expr::value(now))
        .filter(policy::Column::Id.eq(id));
    match status {
        Some(status) => update.filter(policy::Column::Status.eq(status.as_str())),
        None => update,
    }
}

pub(crate) async fn find_model<C: ConnectionTrait>(
    conn: &C,
    id: &str,
) -> Result<policy::Model, ArbiterError> {
    policy::Entity::find_by_id(id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| ArbiterError::not_found("policy", id))
}

/// Explain why a guarded update touched no row: the policy is gone, or
/// `check` rejects its current state.
pub(crate) async fn rejection<C, F>(conn: &C, id: &str, check: F) -> ArbiterError
where
    C: ConnectionTrait,
    F: FnOnce(&str, PolicyStatus) -> Result<(), ArbiterError>,
{
    let model = match find_model(conn, id).await {
        Ok(model) => model,
        Err(e) => return e,
    };
    let status = match model.status.parse::<PolicyStatus>() {
        Ok(status) => status,
        Err(e) => return e,
    };
    match check(id, status) {
        Err(e) => e,
        // Only reachable if the row changed between the two statements
        Ok(()) => ArbiterError::Unavailable(format!(
            "policy `{id}` was modified concurrently, retry the request"
        )),
    }
}

pub async fn create_draft(
    db: &DatabaseConnection,
    policy_number: i32,
    name: &str,
    description: Option<String>,
) -> Result<Policy, ArbiterError> {
    if policy_number < 1 {
        return Err(ArbiterError::InvalidRequest(
            "policy_number must be a positive integer".into(),
        ));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(ArbiterError::InvalidRequest("name must not be empty".into()));
    }

    let now = now_millis();
    let model = policy::ActiveModel {
        id: Set(random_id()),
        policy_number: Set(policy_number),
        name: Set(name.to_string()),
        description: Set(description.filter(|d| !d.trim().is_empty())),
        status: Set(PolicyStatus::Draft.as_str().to_string()),
        revision: Set(0),
        allow_count: Set(0),
        deny_count: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let model = model.insert(db).await.map_err(|e| {
        if is_unique_violation(&e) {
            ArbiterError::DuplicateNumber(policy_number)
        } else {
            ArbiterError::Db(e)
        }
    })?;

    tracing::info!(policy_id = %model.id, policy_number, "Policy draft created");
    to_policy(model)
}

pub async fn get(db: &DatabaseConnection, id: &str) -> Result<Policy, ArbiterError> {
    to_policy(find_model(db, id).await?)
}

/// All policies regardless of status, by policy number.
pub async fn list(db: &DatabaseConnection) -> Result<Vec<Policy>, ArbiterError> {
    policy::Entity::find()
        .order_by_asc(policy::Column::PolicyNumber)
        .all(db)
        .await?
        .into_iter()
        .map(to_policy)
        .collect()
}

/// Policies of any status bound directly to the given subject.
pub async fn list_for_subject(
    db: &DatabaseConnection,
    subject_type: SubjectType,
    subject_id: &str,
) -> Result<Vec<Policy>, ArbiterError> {
    policy::Entity::find()
        .inner_join(policy_binding::Entity)
        .filter(policy_binding::Column::SubjectType.eq(subject_type.as_str()))
        .filter(policy_binding::Column::SubjectId.eq(subject_id))
        .order_by_asc(policy::Column::PolicyNumber)
        .all(db)
        .await?
        .into_iter()
        .map(to_policy)
        .collect()
}

/// Delete a draft together with its rules and bindings.
pub async fn delete(db: &DatabaseConnection, id: &str) -> Result<(), ArbiterError> {
    let txn = db.begin().await?;

    let claimed = guarded_update(id, Some(PolicyStatus::Draft), now_millis())
        .exec(&txn)
        .await?;
    if claimed.rows_affected == 0 {
        txn.rollback().await?;
        return Err(rejection(db, id, lifecycle::ensure_deletable).await);
    }

    let rules = policy_rule::Entity::delete_many()
        .filter(policy_rule::Column::PolicyId.eq(id))
        .exec(&txn)
        .await?;
    let bindings = policy_binding::Entity::delete_many()
        .filter(policy_binding::Column::PolicyId.eq(id))
        .exec(&txn)
        .await?;
    policy::Entity::delete_by_id(id.to_string())
        .exec(&txn)
        .await?;
    txn.commit().await?;

    tracing::info!(
        policy_id = %id,
        rules = rules.rows_affected,
        bindings = bindings.rows_affected,
        "Policy deleted"
    );
    Ok(())
}

pub async fn activate(db: &DatabaseConnection, id: &str) -> Result<Policy, ArbiterError> {
    apply_transition(db, id, Transition::Activate).await
}

pub async fn archive(db: &DatabaseConnection, id: &str) -> Result<Policy, ArbiterError> {
    apply_transition(db, id, Transition::Archive).await
}

/// One guarded update: of concurrent callers exactly one sees the expected
/// source state and wins.
async fn apply_transition(
    db: &DatabaseConnection,
    id: &str,
    requested: Transition,
) -> Result<Policy, ArbiterError> {
    let result = guarded_update(id, Some(requested.from_status()), now_millis())
        .col_expr(
            policy::Column::Status,
            Expr::value(requested.to_status().as_str()),
        )
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(rejection(db, id, |id, current| {
            lifecycle::transition(id, current, requested).map(|_| ())
        })
        .await);
    }

    let policy = get(db, id).await?;
    tracing::info!(policy_id = %id, status = %policy.status, "Policy status changed");
    Ok(policy)
}
