pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("unsupported database url `{0}` (expected postgres:// or sqlite:)")]
    UnsupportedUrl(String),
}

/// A row of the `todos` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: i64,
    #[serde(rename = "todo")]
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Trait defining the storage operations the assistant's tools are built on
#[async_trait]
pub trait TodoStore: Send {
    /// Create the `todos` table if it does not exist yet
    async fn migrate(&mut self) -> Result<(), StoreError>;

    /// Every stored todo, oldest first
    async fn list_all(&mut self) -> Result<Vec<Todo>, StoreError>;

    /// Insert a todo and return its generated id
    async fn create(&mut self, text: &str) -> Result<i64, StoreError>;

    /// Delete by id. Deleting an id that does not exist is not an error.
    async fn delete_by_id(&mut self, id: i64) -> Result<(), StoreError>;

    /// Todos whose text contains `query`, ignoring case
    async fn search(&mut self, query: &str) -> Result<Vec<Todo>, StoreError>;
}

/// Opens a store for `url`, choosing the backend from the scheme, and runs the migration.
pub async fn connect(url: &str) -> Result<Box<dyn TodoStore>, StoreError> {
    let mut store: Box<dyn TodoStore> =
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Box::new(postgres::PostgresTodoStore::new(url).await?)
        } else if url.starts_with("sqlite:") {
            Box::new(sqlite::SqliteTodoStore::new(url).await?)
        } else {
            return Err(StoreError::UnsupportedUrl(url.to_string()));
        };

    store.migrate().await?;
    Ok(store)
}

/// Escapes `LIKE` wildcards so `query` matches literally.
pub(crate) fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
