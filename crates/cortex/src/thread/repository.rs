//! SQLite-backed thread store.

use async_trait::async_trait;
use cortex_protocol::{Message, ThreadSummary};
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::models::{MessageRow, Thread, ThreadRow};
use super::store::{StoreError, StoreResult, ThreadStore};

const SUMMARY_SELECT: &str = r#"
    SELECT t.thread_id, t.title, t.created_at, t.updated_at,
           COUNT(m.idx) AS message_count
    FROM threads t
    LEFT JOIN messages m ON m.thread_id = t.thread_id
"#;

/// Thread store over the `threads` and `messages` tables.
#[derive(Debug, Clone)]
pub struct SqliteThreadStore {
    pool: SqlitePool,
}

impl SqliteThreadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn summary(&self, thread_id: &str) -> StoreResult<Option<ThreadSummary>> {
        let sql = format!("{SUMMARY_SELECT} WHERE t.thread_id = ? GROUP BY t.thread_id");
        let row = sqlx::query_as::<_, ThreadRow>(&sql)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ThreadSummary::from))
    }

    /// Rewrite every message row of a thread inside `tx`.
    async fn write_messages(
        tx: &mut Transaction<'_, Sqlite>,
        thread_id: &str,
        messages: &[Message],
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM messages WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut **tx)
            .await?;

        for (idx, message) in messages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO messages (thread_id, idx, role, content)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(thread_id)
            .bind(idx as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn get_thread(&self, thread_id: &str) -> StoreResult<Option<Thread>> {
        let Some(summary) = self.summary(thread_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT role, content FROM messages WHERE thread_id = ? ORDER BY idx ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(Thread {
            thread_id: summary.thread_id,
            title: summary.title,
            messages,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }))
    }

    async fn create_thread(
        &self,
        thread_id: &str,
        title: &str,
        messages: &[Message],
        timestamp: i64,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO threads (thread_id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(thread_id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(thread_id)
        .bind(title)
        .bind(timestamp)
        .bind(timestamp)
        .execute(&mut *tx)
        .await?;

        Self::write_messages(&mut tx, thread_id, messages).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_messages(
        &self,
        thread_id: &str,
        messages: &[Message],
        timestamp: i64,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE threads SET updated_at = ? WHERE thread_id = ?")
            .bind(timestamp)
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(thread_id.to_string()));
        }

        Self::write_messages(&mut tx, thread_id, messages).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_threads(&self) -> StoreResult<Vec<ThreadSummary>> {
        let sql = format!(
            "{SUMMARY_SELECT} GROUP BY t.thread_id ORDER BY t.updated_at DESC, t.created_at DESC"
        );
        let rows = sqlx::query_as::<_, ThreadRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ThreadSummary::from).collect())
    }

    async fn delete_thread(&self, thread_id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM threads WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn rename_thread(
        &self,
        thread_id: &str,
        title: &str,
        timestamp: i64,
    ) -> StoreResult<Option<ThreadSummary>> {
        let updated =
            sqlx::query("UPDATE threads SET title = ?, updated_at = ? WHERE thread_id = ?")
                .bind(title)
                .bind(timestamp)
                .bind(thread_id)
                .execute(&self.pool)
                .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.summary(thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> (Database, SqliteThreadStore) {
        let db = Database::in_memory().await.unwrap();
        let store = SqliteThreadStore::new(db.pool().clone());
        (db, store)
    }

    #[tokio::test]
    async fn test_create_and_get_thread() {
        let (_db, store) = setup().await;
        let messages = vec![Message::user("Hello"), Message::assistant("Hi there!")];
        store
            .create_thread("t-1", "Greeting", &messages, 1_000)
            .await
            .unwrap();

        let thread = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(thread.title, "Greeting");
        assert_eq!(thread.messages, messages);
        assert_eq!(thread.created_at, 1_000);
        assert_eq!(thread.updated_at, 1_000);

        assert!(store.get_thread("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_messages_rewrites_in_order() {
        let (_db, store) = setup().await;
        store
            .create_thread("t-1", "Title", &[Message::user("Hi")], 1_000)
            .await
            .unwrap();

        let next = vec![
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::user("How are you?"),
            Message::assistant(""),
        ];
        store.replace_messages("t-1", &next, 2_000).await.unwrap();

        let thread = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(thread.messages, next);
        assert_eq!(thread.updated_at, 2_000);
        assert_eq!(thread.created_at, 1_000);

        // Shrinking removes the dropped tail.
        store
            .replace_messages("t-1", &next[..1], 3_000)
            .await
            .unwrap();
        let thread = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(thread.messages, vec![Message::user("Hi")]);
    }

    #[tokio::test]
    async fn test_replace_messages_on_missing_thread() {
        let (_db, store) = setup().await;
        let err = store
            .replace_messages("ghost", &[Message::user("x")], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.get_thread("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_existing_thread_keeps_title() {
        let (_db, store) = setup().await;
        store
            .create_thread("t-1", "First", &[Message::user("a")], 1)
            .await
            .unwrap();
        store
            .create_thread("t-1", "Second", &[Message::user("b")], 2)
            .await
            .unwrap();

        let thread = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(thread.title, "First");
        assert_eq!(thread.messages, vec![Message::user("b")]);
        assert_eq!(thread.updated_at, 2);
    }

    #[tokio::test]
    async fn test_list_threads_newest_first() {
        let (_db, store) = setup().await;
        store
            .create_thread("old", "Old", &[Message::user("a")], 1_000)
            .await
            .unwrap();
        store
            .create_thread("new", "New", &[Message::user("b")], 2_000)
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_threads()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.thread_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        // A commit on the old thread moves it to the front.
        store
            .replace_messages(
                "old",
                &[Message::user("a"), Message::assistant("b")],
                3_000,
            )
            .await
            .unwrap();
        let threads = store.list_threads().await.unwrap();
        assert_eq!(threads[0].thread_id, "old");
        assert_eq!(threads[0].message_count, 2);
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let (_db, store) = setup().await;
        store
            .create_thread("t-1", "Before", &[Message::user("a")], 1)
            .await
            .unwrap();

        let renamed = store.rename_thread("t-1", "After", 5).await.unwrap().unwrap();
        assert_eq!(renamed.title, "After");
        assert_eq!(renamed.updated_at, 5);
        assert_eq!(renamed.message_count, 1);
        assert!(store.rename_thread("nope", "x", 5).await.unwrap().is_none());

        assert!(store.delete_thread("t-1").await.unwrap());
        assert!(!store.delete_thread("t-1").await.unwrap());
        assert!(store.get_thread("t-1").await.unwrap().is_none());
        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
