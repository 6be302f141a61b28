//! Embedded sqlx migrator. Tests attach it via
//! `#[sqlx::test(migrator = "tasker_shared::database::migrator::MIGRATOR")]`.

/// Workspace migrations, embedded at compile time
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
