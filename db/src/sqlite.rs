use super::{StoreError, Todo, TodoStore};
use chrono::Utc;
use sqlx::{
    ConnectOptions, Row, SqliteConnection,
    sqlite::{SqliteConnectOptions, SqliteRow},
};
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug)]
pub struct SqliteTodoStore {
    connection: SqliteConnection,
}

impl SqliteTodoStore {
    /// Opens (creating if needed) the database at `url`; `sqlite::memory:` gives a private in-memory one.
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let connection = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .connect()
            .await?;
        info!(url, "Opened sqlite database");
        Ok(Self { connection })
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        let mut store = Self::new("sqlite::memory:").await?;
        store.migrate().await?;
        Ok(store)
    }
}

fn todo_from_row(row: &SqliteRow) -> Result<Todo, sqlx::Error> {
    Ok(Todo {
        id: row.try_get("id")?,
        text: row.try_get("todo")?,
        created_at: row.try_get("createdAt")?,
        updated_at: row.try_get("updatedAt")?,
    })
}

#[async_trait::async_trait]
impl TodoStore for SqliteTodoStore {
    async fn migrate(&mut self) -> Result<(), StoreError> {
        // AUTOINCREMENT keeps deleted ids from being handed out again
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS todos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                todo TEXT NOT NULL,
                createdAt TEXT NOT NULL,
                updatedAt TEXT NOT NULL
            )",
        )
        .execute(&mut self.connection)
        .await?;

        Ok(())
    }

    async fn list_all(&mut self) -> Result<Vec<Todo>, StoreError> {
        let rows = sqlx::query("SELECT id, todo, createdAt, updatedAt FROM todos ORDER BY id")
            .fetch_all(&mut self.connection)
            .await?;

        Ok(rows.iter().map(todo_from_row).collect::<Result<_, _>>()?)
    }

    async fn create(&mut self, text: &str) -> Result<i64, StoreError> {
        let now = Utc::now();
        let id = sqlx::query("INSERT INTO todos (todo, createdAt, updatedAt) VALUES (?, ?, ?)")
            .bind(text)
            .bind(now)
            .bind(now)
            .execute(&mut self.connection)
            .await?
            .last_insert_rowid();

        debug!(id, "Created todo");
        Ok(id)
    }

    async fn delete_by_id(&mut self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM todos WHERE id = ?")
            .bind(id)
            .execute(&mut self.connection)
            .await?;

        debug!(id, deleted = result.rows_affected(), "Deleted todo");
        Ok(())
    }

    async fn search(&mut self, query: &str) -> Result<Vec<Todo>, StoreError> {
        // SQLite's lower() and LIKE only fold ASCII
        let needle = query.to_lowercase();
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|todo| todo.text.to_lowercase().contains(&needle))
            .collect())
    }
}
