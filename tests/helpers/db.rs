use arbiter::authz::types::{Role, Subject};
use arbiter::storage::subjects;
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Create (or update) a role in the subject directory
pub async fn seed_role(db: &DatabaseConnection, id: &str, level: i32) -> Role {
    subjects::upsert_role(db, id, &format!("Role {id}"), level, None)
        .await
        .expect("Failed to seed role");
    subjects::get_role(db, id).await.expect("Seeded role missing")
}

/// Create (or update) a user holding `role_id`
pub async fn seed_user(db: &DatabaseConnection, id: &str, role_id: &str) -> Subject {
    subjects::upsert_user(db, id, role_id, Some(format!("user-{id}")))
        .await
        .expect("Failed to seed user");
    subjects::get_user(db, id).await.expect("Seeded user missing")
}
