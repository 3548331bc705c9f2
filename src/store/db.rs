//! SQLite database handle — connection wrapper and migrations.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

/// Shared database handle wrapping a SQLite connection behind a Mutex.
///
/// Using `Mutex` (not `RwLock`) because rusqlite `Connection` is `!Sync`.
/// All DB access is serialized — fine for a write-light sync workload.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Query(format!("create dir {}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path).map_err(StoreError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a lock on the underlying connection.
    ///
    /// Callers hold the lock for the duration of their DB operation.
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("Database mutex poisoned")
    }

    /// Run all schema migrations.
    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.conn();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                seller_id TEXT NOT NULL,
                marketplace TEXT NOT NULL,
                channel TEXT NOT NULL,
                external_id TEXT NOT NULL,
                text TEXT NOT NULL,
                rating INTEGER,
                attachments TEXT NOT NULL DEFAULT '[]',
                customer_id TEXT,
                customer_name TEXT,
                order_id TEXT,
                product_id TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                needs_response INTEGER NOT NULL DEFAULT 1,
                priority TEXT NOT NULL DEFAULT 'normal',
                sla_deadline TEXT,
                escalated_at TEXT,
                source TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                extension TEXT NOT NULL DEFAULT '{}',
                UNIQUE(seller_id, marketplace, channel, external_id)
            );
            CREATE INDEX IF NOT EXISTS idx_interactions_status ON interactions(status);
            CREATE INDEX IF NOT EXISTS idx_interactions_seller ON interactions(seller_id);
            CREATE INDEX IF NOT EXISTS idx_interactions_order ON interactions(order_id);
            CREATE INDEX IF NOT EXISTS idx_interactions_customer ON interactions(customer_id);
            CREATE INDEX IF NOT EXISTS idx_interactions_deadline ON interactions(sla_deadline);

            CREATE TABLE IF NOT EXISTS sync_watermarks (
                seller_id TEXT NOT NULL,
                marketplace TEXT NOT NULL,
                channel TEXT NOT NULL,
                cursor TEXT,
                last_synced_at TEXT,
                consecutive_errors INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (seller_id, marketplace, channel)
            );

            CREATE TABLE IF NOT EXISTS sla_rules (
                id TEXT PRIMARY KEY,
                seller_id TEXT,
                channel TEXT,
                intent TEXT,
                max_rating INTEGER,
                deadline_minutes INTEGER NOT NULL,
                priority_on_match TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS link_candidates (
                id TEXT PRIMARY KEY,
                source_interaction_id TEXT NOT NULL,
                target_interaction_id TEXT NOT NULL,
                method TEXT NOT NULL,
                confidence REAL NOT NULL,
                explanation TEXT NOT NULL,
                superseded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_links_source ON link_candidates(source_interaction_id);

            CREATE TABLE IF NOT EXISTS interaction_events (
                id TEXT PRIMARY KEY,
                interaction_id TEXT,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                occurred_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_interaction ON interaction_events(interaction_id);
            CREATE INDEX IF NOT EXISTS idx_events_type ON interaction_events(event_type);",
        )
        .map_err(StoreError::from)?;

        info!("Database migrations complete");
        Ok(())
    }
}
