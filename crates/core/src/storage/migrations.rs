//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        sql: r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Bearer tokens issued by the auth provider
            CREATE TABLE IF NOT EXISTS auth_tokens (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Buying groups
            CREATE TABLE IF NOT EXISTS buying_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (created_by) REFERENCES users(id)
            );

            -- Group memberships
            CREATE TABLE IF NOT EXISTS group_members (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                joined_at TEXT NOT NULL,
                FOREIGN KEY (group_id) REFERENCES buying_groups(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                UNIQUE(group_id, user_id)
            );
        "#,
    },
    Migration {
        version: 2,
        description: "Add calculations and member intentions",
        sql: r#"
            -- One cost/share analysis per (group, property)
            CREATE TABLE IF NOT EXISTS calculations (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                property_id TEXT NOT NULL,
                costs_json TEXT NOT NULL DEFAULT '{}',
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (group_id) REFERENCES buying_groups(id) ON DELETE CASCADE,
                FOREIGN KEY (created_by) REFERENCES users(id),
                UNIQUE(group_id, property_id)
            );

            -- Desired/max shares recorded before negotiation
            CREATE TABLE IF NOT EXISTS member_intentions (
                id TEXT PRIMARY KEY,
                calculation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                desired_percentage REAL NOT NULL,
                max_percentage REAL NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (calculation_id) REFERENCES calculations(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id),
                UNIQUE(calculation_id, user_id),
                CHECK (desired_percentage > 0 AND desired_percentage <= max_percentage AND max_percentage <= 100)
            );
        "#,
    },
    Migration {
        version: 3,
        description: "Add negotiation sessions, participants and locked distributions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS negotiation_sessions (
                id TEXT PRIMARY KEY,
                calculation_id TEXT NOT NULL,
                status TEXT NOT NULL,
                locked_at TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (calculation_id) REFERENCES calculations(id) ON DELETE CASCADE,
                FOREIGN KEY (created_by) REFERENCES users(id)
            );

            -- At most one live (non-abandoned) session per calculation
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_live_calculation
                ON negotiation_sessions(calculation_id) WHERE status != 'abandoned';

            CREATE TABLE IF NOT EXISTS session_participants (
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                current_percentage REAL NOT NULL,
                status TEXT NOT NULL,
                is_online INTEGER NOT NULL DEFAULT 0,
                last_updated_at TEXT NOT NULL,
                PRIMARY KEY (session_id, user_id),
                FOREIGN KEY (session_id) REFERENCES negotiation_sessions(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS locked_distributions (
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                percentage REAL NOT NULL,
                locked_at TEXT NOT NULL,
                PRIMARY KEY (session_id, user_id),
                FOREIGN KEY (session_id) REFERENCES negotiation_sessions(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 4,
        description: "Add session transition log",
        sql: r#"
            CREATE TABLE IF NOT EXISTS session_transitions (
                session_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                percentage REAL,
                status TEXT,
                at TEXT NOT NULL,
                PRIMARY KEY (session_id, sequence),
                FOREIGN KEY (session_id) REFERENCES negotiation_sessions(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 5,
        description: "Add indexes for query performance",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_auth_tokens_user ON auth_tokens(user_id);
            CREATE INDEX IF NOT EXISTS idx_auth_tokens_expires ON auth_tokens(expires_at);
            CREATE INDEX IF NOT EXISTS idx_group_members_group ON group_members(group_id, status);
            CREATE INDEX IF NOT EXISTS idx_intentions_calculation ON member_intentions(calculation_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_calculation ON negotiation_sessions(calculation_id);
        "#,
    },
];

/// Initialize the migrations table
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version
fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

/// Record that a migration was applied
fn record_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Run all pending migrations
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let current_version = get_current_version(conn)?;
    info!(current_version, "Checking for pending migrations");

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );

            // Schema change and its version record land together or not at all
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration.sql)?;
            record_migration(&tx, migration)?;
            tx.commit()?;

            info!(version = migration.version, "Migration complete");
        }
    }

    let new_version = get_current_version(conn)?;
    if new_version > current_version {
        info!(
            from = current_version,
            to = new_version,
            "Database schema updated"
        );
    }

    Ok(())
}
