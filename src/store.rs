//! Durable storage for pending actions.
//!
//! The store is the source of truth: the in-memory queue is a mirror of it and
//! can be rebuilt from `load_all_pending` after a restart.

use crate::action::{ActionId, PendingAction};
use crate::error::QueueError;

#[async_trait::async_trait]
pub trait ActionStore: Send + Sync {
    /// Persist a new action and return its durable id.
    async fn insert(&self, action: &PendingAction) -> Result<ActionId, QueueError>;

    /// Remove a row. Returns whether a row existed.
    async fn delete(&self, id: ActionId) -> Result<bool, QueueError>;

    /// Rewrite the mutable columns (`scheduled_at`, `retry_count`).
    async fn update(&self, action: &PendingAction) -> Result<(), QueueError>;

    /// All rows ordered by `scheduled_at`, then id. Rows that cannot be decoded
    /// come back as `Err(QueueError::CorruptedRow)` in their position.
    async fn load_all_pending(&self) -> Result<Vec<Result<PendingAction, QueueError>>, QueueError>;
}

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteActionStore;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use rusqlite::{params, Connection};
    use tracing::debug;

    use super::ActionStore;
    use crate::action::{ActionId, ActionKind, ActionPayload, PendingAction, UnixTimeMs};
    use crate::error::QueueError;

    const SCHEMA: &str = r#"
        CREATE TABLE IF NOT EXISTS pending_actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            scheduled_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_pending_actions_scheduled
            ON pending_actions(scheduled_at ASC, id ASC);
    "#;

    /// SQLite-backed store. Every operation is a single statement, so
    /// single-row atomicity comes from SQLite itself. Statements run on the
    /// blocking pool; the async side only awaits their result.
    pub struct SqliteActionStore {
        conn: Arc<Mutex<Connection>>,
    }

    impl SqliteActionStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
            let conn = Connection::open(path)?;
            Self::init(conn)
        }

        pub fn open_in_memory() -> Result<Self, QueueError> {
            Self::init(Connection::open_in_memory()?)
        }

        fn init(conn: Connection) -> Result<Self, QueueError> {
            conn.execute_batch(SCHEMA)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }

        fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, QueueError> {
            conn.lock()
                .map_err(|_| QueueError::Storage("connection lock poisoned".into()))
        }

        /// Run one statement against the connection on the blocking pool.
        async fn run<T, F>(&self, f: F) -> Result<T, QueueError>
        where
            T: Send + 'static,
            F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        {
            let conn = Arc::clone(&self.conn);
            tokio::task::spawn_blocking(move || {
                let conn = Self::lock(&conn)?;
                f(&conn).map_err(QueueError::from)
            })
            .await
            .map_err(|e| QueueError::Storage(format!("storage task failed: {e}")))?
        }

        /// Number of rows, pending or quarantined.
        pub fn row_count(&self) -> Result<usize, QueueError> {
            let conn = Self::lock(&self.conn)?;
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_actions", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        }
    }

    struct RawRow {
        id: i64,
        kind: String,
        payload: String,
        created_at: i64,
        scheduled_at: i64,
        retry_count: i64,
    }

    fn decode(raw: RawRow) -> Result<PendingAction, QueueError> {
        let id = ActionId(raw.id);
        let payload: ActionPayload =
            serde_json::from_str(&raw.payload).map_err(|e| QueueError::CorruptedRow {
                id,
                reason: e.to_string(),
            })?;

        if ActionKind::parse(&raw.kind) != Some(payload.kind()) {
            return Err(QueueError::CorruptedRow {
                id,
                reason: format!(
                    "kind column '{}' does not match payload kind '{}'",
                    raw.kind,
                    payload.kind()
                ),
            });
        }

        Ok(PendingAction {
            id,
            created_at: UnixTimeMs(raw.created_at.max(0) as u64),
            scheduled_at: UnixTimeMs(raw.scheduled_at.max(0) as u64),
            retry_count: raw.retry_count.clamp(0, i64::from(u32::MAX)) as u32,
            payload,
        })
    }

    #[async_trait::async_trait]
    impl ActionStore for SqliteActionStore {
        async fn insert(&self, action: &PendingAction) -> Result<ActionId, QueueError> {
            let payload = serde_json::to_string(&action.payload)?;
            let kind = action.kind();
            let created_at = action.created_at.0 as i64;
            let scheduled_at = action.scheduled_at.0 as i64;
            let retry_count = i64::from(action.retry_count);

            let id = self
                .run(move |conn| {
                    conn.execute(
                        r#"
                        INSERT INTO pending_actions (kind, payload, created_at, scheduled_at, retry_count)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                        params![kind.as_str(), payload, created_at, scheduled_at, retry_count],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await?;
            debug!(id, %kind, "row inserted");
            Ok(ActionId(id))
        }

        async fn delete(&self, id: ActionId) -> Result<bool, QueueError> {
            let rows = self
                .run(move |conn| conn.execute("DELETE FROM pending_actions WHERE id = ?1", [id.0]))
                .await?;
            Ok(rows > 0)
        }

        async fn update(&self, action: &PendingAction) -> Result<(), QueueError> {
            let id = action.id;
            let scheduled_at = action.scheduled_at.0 as i64;
            let retry_count = i64::from(action.retry_count);

            let rows = self
                .run(move |conn| {
                    conn.execute(
                        "UPDATE pending_actions SET scheduled_at = ?1, retry_count = ?2 WHERE id = ?3",
                        params![scheduled_at, retry_count, id.0],
                    )
                })
                .await?;
            if rows == 0 {
                return Err(QueueError::UnknownAction(id));
            }
            Ok(())
        }

        async fn load_all_pending(
            &self,
        ) -> Result<Vec<Result<PendingAction, QueueError>>, QueueError> {
            let rows = self
                .run(|conn| {
                    let mut stmt = conn.prepare(
                        r#"
                        SELECT id, kind, payload, created_at, scheduled_at, retry_count
                        FROM pending_actions
                        ORDER BY scheduled_at ASC, id ASC
                        "#,
                    )?;
                    let mapped = stmt.query_map([], |row| {
                        Ok(RawRow {
                            id: row.get(0)?,
                            kind: row.get(1)?,
                            payload: row.get(2)?,
                            created_at: row.get(3)?,
                            scheduled_at: row.get(4)?,
                            retry_count: row.get(5)?,
                        })
                    })?;
                    mapped.collect::<Result<Vec<_>, _>>()
                })
                .await?;

            Ok(rows.into_iter().map(decode).collect())
        }
    }

    #[cfg(test)]
    impl SqliteActionStore {
        pub(crate) fn shared_connection(&self) -> Arc<Mutex<Connection>> {
            Arc::clone(&self.conn)
        }

        pub(crate) fn insert_raw(&self, kind: &str, payload: &str, scheduled_at: i64) -> i64 {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO pending_actions (kind, payload, created_at, scheduled_at, retry_count) VALUES (?1, ?2, ?3, ?3, 0)",
                params![kind, payload, scheduled_at],
            )
            .unwrap();
            conn.last_insert_rowid()
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::action::{ActionPayload, UnixTimeMs, VoteDirection};

    fn at(ms: u64, payload: ActionPayload) -> PendingAction {
        PendingAction::new(payload, UnixTimeMs(ms))
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = SqliteActionStore::open_in_memory().unwrap();

        let a = store
            .insert(&at(10, ActionPayload::vote("t3_a", VoteDirection::Up)))
            .await
            .unwrap();
        let b = store
            .insert(&at(11, ActionPayload::comment("t3_a", "hi")))
            .await
            .unwrap();

        assert!(a.is_saved());
        assert!(b.0 > a.0);
        assert_eq!(store.row_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_orders_by_scheduled_at_then_id() {
        let store = SqliteActionStore::open_in_memory().unwrap();

        let late = store
            .insert(&at(300, ActionPayload::delete_comment("t1_c")))
            .await
            .unwrap();
        let early = store
            .insert(&at(100, ActionPayload::edit("t1_a", "text")))
            .await
            .unwrap();
        let tie = store
            .insert(&at(100, ActionPayload::vote("t3_b", VoteDirection::Down)))
            .await
            .unwrap();

        let loaded: Vec<_> = store
            .load_all_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap().id)
            .collect();

        assert_eq!(loaded, vec![early, tie, late]);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = SqliteActionStore::open_in_memory().unwrap();
        let mut action = at(100, ActionPayload::comment("t3_a", "hello"));
        action.id = store.insert(&action).await.unwrap();

        action.retry_count = 2;
        action.scheduled_at = UnixTimeMs(500);
        store.update(&action).await.unwrap();

        let loaded = store.load_all_pending().await.unwrap().remove(0).unwrap();
        assert_eq!(loaded, action);

        assert!(store.delete(action.id).await.unwrap());
        assert!(!store.delete(action.id).await.unwrap());
        assert!(matches!(
            store.update(&action).await,
            Err(QueueError::UnknownAction(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupted_rows_are_reported_in_place() {
        let store = SqliteActionStore::open_in_memory().unwrap();
        store
            .insert(&at(1, ActionPayload::vote("t3_a", VoteDirection::Up)))
            .await
            .unwrap();
        let garbage = store.insert_raw("vote", "{not json", 2);
        let mismatched = store.insert_raw("comment", r#"{"kind":"delete_comment","target_id":"x"}"#, 3);

        let loaded = store.load_all_pending().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded[0].is_ok());
        assert!(matches!(
            &loaded[1],
            Err(QueueError::CorruptedRow { id, .. }) if id.0 == garbage
        ));
        assert!(matches!(
            &loaded[2],
            Err(QueueError::CorruptedRow { id, .. }) if id.0 == mismatched
        ));
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.db");

        {
            let store = SqliteActionStore::open(&path).unwrap();
            store
                .insert(&at(1, ActionPayload::comment("t3_a", "persist me")))
                .await
                .unwrap();
        }

        let store = SqliteActionStore::open(&path).unwrap();
        let loaded = store.load_all_pending().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].as_ref().unwrap().payload,
            ActionPayload::comment("t3_a", "persist me")
        );
    }

    #[tokio::test]
    async fn test_busy_connection_does_not_block_the_runtime() {
        let store = Arc::new(SqliteActionStore::open_in_memory().unwrap());

        let held = store.shared_connection();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = held.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        let insert = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                store
                    .insert(&at(1, ActionPayload::comment("t3_a", "waits")))
                    .await
            }
        });

        // Single-threaded runtime: this timer only fires if the insert
        // is waiting somewhere other than the runtime thread.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!insert.is_finished());

        assert!(insert.await.unwrap().unwrap().is_saved());
        holder.join().unwrap();
        assert_eq!(store.row_count().unwrap(), 1);
    }
}
