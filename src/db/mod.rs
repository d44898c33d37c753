//! SQLite-backed working store for the ingestion pipeline.
//!
//! The database lives at `~/.leadflow/leadflow.db` and holds mailbox
//! credentials, the idempotency ledger, and the CRM entities this pipeline
//! projects inbound messages into. WAL mode keeps reads cheap while a sync
//! pass is writing.

use std::path::PathBuf;

use rusqlite::Connection;

pub mod types;
pub use types::*;

mod accounts;
mod activities;
mod contacts;
mod deals;
mod drafts;
mod processed;

pub use accounts::NewMailboxAccount;
pub use activities::NewActivity;
pub use deals::NewDeal;
pub use drafts::NewDraft;
pub use processed::NewProcessedMessage;

pub struct CrmDb {
    conn: Connection,
}

impl CrmDb {
    /// Open (or create) the database at `~/.leadflow/leadflow.db` and apply
    /// the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.leadflow/leadflow.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".leadflow").join("leadflow.db"))
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::test_db;
    use super::*;

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (db, _dir) = test_db();

        let result: Result<(), DbError> = db.with_transaction(|db| {
            db.conn_ref().execute(
                "INSERT INTO contacts (id, email, created_at, updated_at)
                 VALUES ('c1', 'x@example.com', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(DbError::Migration("forced".to_string()))
        });
        assert!(result.is_err());

        let count: i32 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
