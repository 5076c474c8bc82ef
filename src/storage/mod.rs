//! Persistence for policies, rules, bindings and the subject directory.
//!
//! Every function takes the connection explicitly. Mutations of a policy's
//! rules or bindings open a transaction whose first statement is a guarded
//! update of the policy row (see [`policies::guarded_update`]), which
//! serializes them per policy on both SQLite and PostgreSQL.

pub mod bindings;
pub mod policies;
pub mod rules;
pub mod subjects;

use std::future::Future;

use base64ct::Encoding;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use rand::RngCore;
use sea_orm::{Database, DatabaseConnection, DbErr, SqlErr};

use crate::errors::ArbiterError;
use crate::settings::{Database as DbCfg, Storage as RetryCfg};

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, ArbiterError> {
    let db = Database::connect(&cfg.url).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

/// Current time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Run a read-only storage operation, retrying connection-level failures
/// with exponential backoff. Exhausted retries surface as `Unavailable`.
///
/// Never wrap mutations in this: a write whose commit was lost in transit
/// must not be replayed.
pub async fn with_retry<T, F, Fut>(
    cfg: &RetryCfg,
    operation: &'static str,
    mut op: F,
) -> Result<T, ArbiterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ArbiterError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(e) if e.is_transient() => {
                if attempt >= cfg.max_retries {
                    tracing::error!(operation, attempts = attempt + 1, error = %e, "Storage unavailable");
                    return Err(ArbiterError::Unavailable(e.to_string()));
                }
                let delay = cfg.backoff() * 2u32.saturating_pow(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient storage error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
