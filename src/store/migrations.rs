//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the newer ones, in order.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "shop_records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                phone TEXT,
                email TEXT,
                sms_opted_in INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_clients_phone ON clients(phone);

            CREATE TABLE IF NOT EXISTS client_phones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                phone TEXT NOT NULL,
                label TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (client_id, phone)
            );
            CREATE INDEX IF NOT EXISTS idx_client_phones_phone ON client_phones(phone);

            CREATE TABLE IF NOT EXISTS repairs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id),
                claim_number TEXT NOT NULL,
                device TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'queued',
                priority TEXT NOT NULL DEFAULT 'normal',
                labor_cost TEXT NOT NULL DEFAULT '0',
                tax_exempt INTEGER NOT NULL DEFAULT 0,
                shipping_fee TEXT NOT NULL DEFAULT '0',
                onsite_fee TEXT NOT NULL DEFAULT '0',
                rush_fee TEXT NOT NULL DEFAULT '0',
                deposit_amount TEXT NOT NULL DEFAULT '0',
                diagnostic_fee TEXT,
                diagnostic_fee_collected INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_repairs_client ON repairs(client_id);

            CREATE TABLE IF NOT EXISTS estimates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repair_id INTEGER NOT NULL REFERENCES repairs(id) ON DELETE CASCADE,
                label TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                labor_cost TEXT NOT NULL DEFAULT '0',
                parts_cost TEXT NOT NULL DEFAULT '0',
                total_cost TEXT NOT NULL DEFAULT '0',
                notified_date TEXT,
                approved_date TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_estimates_repair_status ON estimates(repair_id, status);

            CREATE TABLE IF NOT EXISTS repair_parts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repair_id INTEGER NOT NULL REFERENCES repairs(id) ON DELETE CASCADE,
                part_id INTEGER,
                name TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 1,
                unit_price TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_repair_parts_repair ON repair_parts(repair_id);

            CREATE TABLE IF NOT EXISTS repair_notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repair_id INTEGER NOT NULL REFERENCES repairs(id) ON DELETE CASCADE,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_repair_notes_repair ON repair_notes(repair_id);
        "#,
    },
    Migration {
        version: 2,
        name: "sms_messages",
        sql: r#"
            CREATE TABLE IF NOT EXISTS sms_messages (
                id TEXT PRIMARY KEY,
                provider_sid TEXT,
                direction TEXT NOT NULL,
                from_number TEXT NOT NULL,
                to_number TEXT NOT NULL,
                body TEXT NOT NULL,
                client_id INTEGER,
                repair_id INTEGER,
                message_type TEXT NOT NULL DEFAULT 'general',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sms_messages_sid ON sms_messages(provider_sid);
            CREATE INDEX IF NOT EXISTS idx_sms_messages_from ON sms_messages(from_number);
            CREATE INDEX IF NOT EXISTS idx_sms_messages_correlation
                ON sms_messages(to_number, direction, message_type, created_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Record a migration as applied.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
