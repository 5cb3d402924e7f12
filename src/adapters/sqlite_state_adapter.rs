//! SQLite state store: one row per instrument holding its JSON-encoded state.

use crate::domain::error::CandlegateError;
use crate::domain::state::{StateSnapshot, StrategyState};
use crate::ports::state_port::StateStore;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

pub struct SqliteStateStore {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_error(e: r2d2::Error) -> CandlegateError {
    CandlegateError::Persistence {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> CandlegateError {
    CandlegateError::Persistence {
        reason: e.to_string(),
    }
}

impl SqliteStateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CandlegateError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(2).build(manager).map_err(pool_error)?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, CandlegateError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_error)?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, CandlegateError> {
        self.pool.get().map_err(pool_error)
    }

    pub fn initialize_schema(&self) -> Result<(), CandlegateError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS strategy_state (
                    symbol TEXT PRIMARY KEY,
                    last_update TEXT NOT NULL,
                    entry_state TEXT NOT NULL,
                    state_json TEXT NOT NULL
                );",
            )
            .map_err(query_error)
    }
}

impl StateStore for SqliteStateStore {
    fn save(&self, snapshots: &[StateSnapshot]) -> Result<(), CandlegateError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;

        tx.execute("DELETE FROM strategy_state", [])
            .map_err(query_error)?;
        for snapshot in snapshots {
            let state_json = serde_json::to_string(&snapshot.state).map_err(|e| {
                CandlegateError::Persistence {
                    reason: format!("failed to encode state for {}: {}", snapshot.symbol, e),
                }
            })?;
            tx.execute(
                "INSERT INTO strategy_state (symbol, last_update, entry_state, state_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    snapshot.symbol,
                    snapshot.last_update.to_rfc3339(),
                    snapshot.state.phase.label(),
                    state_json
                ],
            )
            .map_err(query_error)?;
        }

        tx.commit().map_err(query_error)
    }

    fn load(&self) -> Result<Vec<StateSnapshot>, CandlegateError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, last_update, state_json FROM strategy_state ORDER BY symbol",
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(query_error)?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (symbol, last_update, state_json) = row.map_err(query_error)?;
            let last_update = DateTime::parse_from_rfc3339(&last_update)
                .map_err(|e| CandlegateError::Persistence {
                    reason: format!("invalid timestamp for {}: {}", symbol, e),
                })?
                .with_timezone(&Utc);
            let state: StrategyState =
                serde_json::from_str(&state_json).map_err(|e| CandlegateError::Persistence {
                    reason: format!("invalid state for {}: {}", symbol, e),
                })?;
            snapshots.push(StateSnapshot {
                symbol,
                last_update,
                state,
            });
        }
        Ok(snapshots)
    }

    fn clear(&self, symbol: Option<&str>) -> Result<(), CandlegateError> {
        let conn = self.conn()?;
        match symbol {
            Some(s) => conn.execute("DELETE FROM strategy_state WHERE symbol = ?1", params![s]),
            None => conn.execute("DELETE FROM strategy_state", []),
        }
        .map_err(query_error)?;
        Ok(())
    }
}
