use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};

use crate::authz::types::{Role, Subject};
use crate::entities::{role, user};
use crate::errors::ArbiterError;
use crate::storage::now_millis;

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Unchanged,
}

fn to_role(model: role::Model) -> Role {
    Role {
        id: model.id,
        name: model.name,
        level: model.level,
        description: model.description,
        created_at: model.created_at,
    }
}

fn to_subject(model: user::Model) -> Subject {
    Subject {
        id: model.id,
        role_id: model.role_id,
        username: model.username,
    }
}

/// Roles by level (most privileged first), then name.
pub async fn list_roles(db: &DatabaseConnection) -> Result<Vec<Role>, ArbiterError> {
    let roles = role::Entity::find()
        .order_by_asc(role::Column::Level)
        .order_by_asc(role::Column::Name)
        .all(db)
        .await?;
    Ok(roles.into_iter().map(to_role).collect())
}

pub async fn get_role(db: &DatabaseConnection, id: &str) -> Result<Role, ArbiterError> {
    role::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .map(to_role)
        .ok_or_else(|| ArbiterError::not_found("role", id))
}

pub async fn get_user(db: &DatabaseConnection, id: &str) -> Result<Subject, ArbiterError> {
    user::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .map(to_subject)
        .ok_or_else(|| ArbiterError::not_found("user", id))
}

pub async fn upsert_role(
    db: &DatabaseConnection,
    id: &str,
    name: &str,
    level: i32,
    description: Option<String>,
) -> Result<Upsert, ArbiterError> {
    let existing = role::Entity::find_by_id(id.to_string()).one(db).await?;
    match existing {
        None => {
            role::ActiveModel {
                id: Set(id.to_string()),
                name: Set(name.to_string()),
                level: Set(level),
                description: Set(description),
                created_at: Set(now_millis()),
            }
            .insert(db)
            .await?;
            Ok(Upsert::Created)
        }
        Some(current)
            if current.name == name
                && current.level == level
                && current.description == description =>
        {
            Ok(Upsert::Unchanged)
        }
        Some(current) => {
            let mut active: role::ActiveModel = current.into();
            active.name = Set(name.to_string());
            active.level = Set(level);
            active.description = Set(description);
            active.update(db).await?;
            Ok(Upsert::Updated)
        }
    }
}

pub async fn upsert_user(
    db: &DatabaseConnection,
    id: &str,
    role_id: &str,
    username: Option<String>,
) -> Result<Upsert, ArbiterError> {
    let existing = user::Entity::find_by_id(id.to_string()).one(db).await?;
    match existing {
        None => {
            user::ActiveModel {
                id: Set(id.to_string()),
                role_id: Set(role_id.to_string()),
                username: Set(username),
                updated_at: Set(now_millis()),
            }
            .insert(db)
            .await?;
            Ok(Upsert::Created)
        }
        Some(current) if current.role_id == role_id && current.username == username => {
            Ok(Upsert::Unchanged)
        }
        Some(current) => {
            let mut active: user::ActiveModel = current.into();
            active.role_id = Set(role_id.to_string());
            active.username = Set(username);
            active.updated_at = Set(now_millis());
            active.update(db).await?;
            Ok(Upsert::Updated)
        }
    }
}

/// Resolve the identity a decision is made for.
///
/// The user must exist. `role_id` defaults to the user's own role and must
/// name a known role either way.
pub async fn resolve_subject(
    db: &DatabaseConnection,
    subject_id: &str,
    role_id: Option<&str>,
) -> Result<(Subject, Role), ArbiterError> {
    if subject_id.trim().is_empty() {
        return Err(ArbiterError::InvalidSubject("empty subject id".into()));
    }
    let subject = match get_user(db, subject_id).await {
        Ok(subject) => subject,
        Err(ArbiterError::NotFound { .. }) => {
            return Err(ArbiterError::InvalidSubject(format!("user `{subject_id}`")))
        }
        Err(e) => return Err(e),
    };

    let role_id = match role_id {
        Some(r) if r.trim().is_empty() => {
            return Err(ArbiterError::InvalidSubject("empty role id".into()))
        }
        Some(r) => r.to_string(),
        None => subject.role_id.clone(),
    };
    let role = match get_role(db, &role_id).await {
        Ok(role) => role,
        Err(ArbiterError::NotFound { .. }) => {
            return Err(ArbiterError::InvalidSubject(format!("role `{role_id}`")))
        }
        Err(e) => return Err(e),
    };
    Ok((subject, role))
}
