use std::collections::HashSet;
use std::fs;
use std::path::Path;

use miette::{IntoDiagnostic, Result};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::storage::subjects::{self, Upsert};

/// Role definition from the JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: String,
    pub name: String,
    /// Lower is more privileged; 0 marks the single superadmin role
    pub level: i32,
    #[serde(default)]
    pub description: Option<String>,
}

/// User definition from the JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefinition {
    pub id: String,
    pub role_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Root structure of the subjects JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectsFile {
    #[serde(default)]
    pub roles: Vec<RoleDefinition>,
    #[serde(default)]
    pub users: Vec<UserDefinition>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SyncStats {
    fn record(&mut self, outcome: Upsert) {
        match outcome {
            Upsert::Created => self.created += 1,
            Upsert::Updated => self.updated += 1,
            Upsert::Unchanged => self.unchanged += 1,
        }
    }
}

/// Sync roles and users from a JSON file into the directory (idempotent)
pub async fn sync_subjects_from_file(db: &DatabaseConnection, path: &Path) -> Result<SyncStats> {
    tracing::info!("Loading subjects from {}", path.display());

    let content = fs::read_to_string(path).into_diagnostic().map_err(|e| {
        miette::miette!("Failed to read subjects file at '{}': {}", path.display(), e)
    })?;

    let file: SubjectsFile = serde_json::from_str(&content)
        .into_diagnostic()
        .map_err(|e| {
            miette::miette!(
                "Failed to parse subjects JSON file: {}\n\nExpected format:\n{{\n  \"roles\": [\n    {{ \"id\": \"admin\", \"name\": \"Administrator\", \"level\": 1 }}\n  ],\n  \"users\": [\n    {{ \"id\": \"u-1\", \"role_id\": \"admin\", \"username\": \"alice\" }}\n  ]\n}}",
                e
            )
        })?;

    sync_subjects(db, &file).await
}

/// Validate and apply an already parsed subjects file.
pub async fn sync_subjects(db: &DatabaseConnection, file: &SubjectsFile) -> Result<SyncStats> {
    validate(db, file).await?;

    tracing::info!(
        "Found {} role(s) and {} user(s) in file",
        file.roles.len(),
        file.users.len()
    );

    let mut roles = SyncStats::default();
    for role in &file.roles {
        let outcome = subjects::upsert_role(
            db,
            &role.id,
            &role.name,
            role.level,
            role.description.clone(),
        )
        .await
        .into_diagnostic()?;
        if outcome != Upsert::Unchanged {
            tracing::info!(role_id = %role.id, ?outcome, "Synced role");
        }
        roles.record(outcome);
    }

    let mut users = SyncStats::default();
    for user in &file.users {
        let outcome = subjects::upsert_user(db, &user.id, &user.role_id, user.username.clone())
            .await
            .into_diagnostic()?;
        if outcome != Upsert::Unchanged {
            tracing::debug!(user_id = %user.id, ?outcome, "Synced user");
        }
        users.record(outcome);
    }

    tracing::info!(
        "Subject sync complete: roles {} created, {} updated, {} unchanged; users {} created, {} updated, {} unchanged",
        roles.created,
        roles.updated,
        roles.unchanged,
        users.created,
        users.updated,
        users.unchanged
    );

    Ok(SyncStats {
        created: roles.created + users.created,
        updated: roles.updated + users.updated,
        unchanged: roles.unchanged + users.unchanged,
    })
}

async fn validate(db: &DatabaseConnection, file: &SubjectsFile) -> Result<()> {
    let mut role_ids = HashSet::new();
    for role in &file.roles {
        if role.id.trim().is_empty() {
            miette::bail!("role ids must not be empty");
        }
        if role.level < 0 {
            miette::bail!("role `{}` has negative level {}", role.id, role.level);
        }
        if !role_ids.insert(role.id.as_str()) {
            miette::bail!("role `{}` is defined more than once", role.id);
        }
    }

    // The level-0 sentinel may exist only once, counting roles already stored
    let stored = subjects::list_roles(db).await.into_diagnostic()?;
    let mut superadmins: HashSet<&str> = file
        .roles
        .iter()
        .filter(|r| r.level == 0)
        .map(|r| r.id.as_str())
        .collect();
    for role in stored.iter().filter(|r| r.level == 0) {
        // A stored sentinel that the file moves to another level no longer counts
        let relevelled = file.roles.iter().any(|r| r.id == role.id && r.level != 0);
        if !relevelled {
            superadmins.insert(role.id.as_str());
        }
    }
    if superadmins.len() > 1 {
        let mut ids: Vec<_> = superadmins.into_iter().collect();
        ids.sort_unstable();
        miette::bail!(
            "only one superadmin (level 0) role is allowed, found: {}",
            ids.join(", ")
        );
    }

    let mut user_ids = HashSet::new();
    for user in &file.users {
        if user.id.trim().is_empty() {
            miette::bail!("user ids must not be empty");
        }
        if !user_ids.insert(user.id.as_str()) {
            miette::bail!("user `{}` is defined more than once", user.id);
        }
        let known = role_ids.contains(user.role_id.as_str())
            || stored.iter().any(|r| r.id == user.role_id);
        if !known {
            miette::bail!("user `{}` references unknown role `{}`", user.id, user.role_id);
        }
    }
    Ok(())
}
