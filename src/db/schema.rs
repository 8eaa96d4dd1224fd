use anyhow::{Context, Result};
use rusqlite::Connection;

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: "001",
    name: "initial",
    sql: include_str!("migrations/001_initial.sql"),
}];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .context("Failed to create schema_migrations table")?;

    let applied = get_applied_migrations(conn)?;

    for migration in MIGRATIONS {
        if !applied.iter().any(|v| v == migration.version) {
            apply_migration(conn, migration)?;
        }
    }

    Ok(())
}

fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(versions)
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    tracing::info!(
        "Applying migration {}: {}",
        migration.version,
        migration.name
    );

    // Schema change and bookkeeping row commit together
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute_batch(&format!(
        "BEGIN TRANSACTION; {} INSERT INTO schema_migrations (version, name, applied_at) VALUES ('{}', '{}', '{}'); COMMIT;",
        migration.sql, migration.version, migration.name, now
    ))
    .with_context(|| {
        format!(
            "Failed to apply migration {}: {}",
            migration.version, migration.name
        )
    })?;

    tracing::info!("Migration {} applied successfully", migration.version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        assert!(table_exists(&conn, "features"));
        assert!(table_exists(&conn, "feature_assignments"));

        let versions = get_applied_migrations(&conn).unwrap();
        assert_eq!(versions, vec!["001"]);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions = get_applied_migrations(&conn).unwrap();
        assert_eq!(versions, vec!["001"]);
    }

    #[test]
    fn test_feature_rows_reject_updates() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO features (name, version, configuration, created_at)
             VALUES ('copilot', 1, '{}', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "UPDATE features SET configuration = '{\"quota\": 10}' WHERE name = 'copilot'",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_second_active_assignment_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO features (name, version, configuration, created_at)
                 VALUES ('copilot', 1, '{}', '2024-01-01T00:00:00Z');
             INSERT INTO feature_assignments
                 (id, subject_kind, subject_id, feature_name, feature_version, activated, reason, created_at)
                 VALUES ('a', 'workspace', 'w1', 'copilot', 1, 1, 'test', '2024-01-01T00:00:00Z');
             INSERT INTO feature_assignments
                 (id, subject_kind, subject_id, feature_name, feature_version, activated, reason, created_at)
                 VALUES ('b', 'workspace', 'w1', 'copilot', 1, 0, 'test', '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO feature_assignments
                 (id, subject_kind, subject_id, feature_name, feature_version, activated, reason, created_at)
                 VALUES ('c', 'workspace', 'w1', 'copilot', 1, 1, 'test', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
