// src/cli/migrate.rs — Database migration command
//
// Migrations run automatically whenever the database is opened; this command
// shows the schema version and can step it back for development.

use crate::storage::schema;

/// Show migration status, roll back the newest migration, or apply pending ones.
pub async fn run_migrate(status_only: bool, rollback: bool) -> anyhow::Result<()> {
    let db_path = crate::infra::paths::db_path();

    if !db_path.exists() && (status_only || rollback) {
        println!("No database found at: {}", db_path.display());
        println!("Run `dostt login <username>` or `dostt serve` to create it.");
        return Ok(());
    }

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = rusqlite::Connection::open(&db_path)?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    if status_only {
        return show_migration_status(&conn);
    }

    if rollback {
        let current = schema::current_version(&conn)?;
        if current == 0 {
            println!("No migrations to roll back.");
            return Ok(());
        }
        println!("Rolling back migration v{current}. Data in its tables will be lost.");
        schema::rollback_to(&conn, current - 1)?;
        return show_migration_status(&conn);
    }

    println!("Running database migrations...");
    schema::run_migrations(&conn)?;
    println!("Migrations complete.");

    show_migration_status(&conn)
}

fn show_migration_status(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let current = schema::current_version(conn)?;

    println!("Database: {}", crate::infra::paths::db_path().display());
    println!(
        "Schema version: {} (latest {})",
        current,
        schema::latest_version()
    );

    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    for row in rows {
        let (version, name, applied_at) = row?;
        println!("  v{version}: {name} (applied {applied_at})");
    }

    Ok(())
}
