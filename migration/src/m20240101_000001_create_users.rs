use sea_orm_migration::sea_orm::DatabaseBackend;
use sea_orm_migration::prelude::*;

const DOWN_SQL: &str = "DROP TABLE IF EXISTS users";

// SQLite has no fixed-point type; REAL keeps salaries numeric so ordering and
// range filters behave the same as on the server engines.
fn create_sql(backend: DatabaseBackend) -> &'static str {
    match backend {
        DatabaseBackend::MySql => {
            r#"
CREATE TABLE IF NOT EXISTS users (
    name   VARCHAR(255) PRIMARY KEY,
    salary DECIMAL(10,2) NOT NULL CHECK (salary >= 0.0)
);
"#
        }
        DatabaseBackend::Postgres => {
            r#"
CREATE TABLE IF NOT EXISTS users (
    name   varchar(255) PRIMARY KEY,
    salary numeric(10,2) NOT NULL CHECK (salary >= 0.0)
);
"#
        }
        DatabaseBackend::Sqlite => {
            r#"
CREATE TABLE IF NOT EXISTS users (
    name   TEXT PRIMARY KEY,
    salary REAL NOT NULL CHECK (salary >= 0.0)
);
"#
        }
    }
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = create_sql(manager.get_database_backend());
        manager
            .get_connection()
            .execute_unprepared(sql)
            .await
            .map(|_| ())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await
            .map(|_| ())
    }
}
