use super::{StoreError, Todo, TodoStore, escape_like};
use chrono::Utc;
use sqlx::{Connection, PgConnection, Row, postgres::PgRow};
use std::fmt::Display;
use tracing::{debug, info};

const SELECT_TODOS: &str =
    r#"SELECT id::int8 AS id, todo, "createdAt" AS created_at, "updatedAt" AS updated_at FROM todos"#;

#[derive(Debug)]
pub struct PostgresTodoStore {
    connection: PgConnection,
}

impl PostgresTodoStore {
    pub async fn new(url: impl Display) -> Result<Self, StoreError> {
        let connection = PgConnection::connect(&url.to_string()).await?;
        info!("Connected to postgres");
        Ok(Self { connection })
    }
}

fn todo_from_row(row: &PgRow) -> Result<Todo, sqlx::Error> {
    Ok(Todo {
        id: row.try_get("id")?,
        text: row.try_get("todo")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait::async_trait]
impl TodoStore for PostgresTodoStore {
    async fn migrate(&mut self) -> Result<(), StoreError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS todos (
                id SERIAL PRIMARY KEY,
                todo TEXT NOT NULL,
                "createdAt" TIMESTAMPTZ NOT NULL DEFAULT now(),
                "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(&mut self.connection)
        .await?;

        Ok(())
    }

    async fn list_all(&mut self) -> Result<Vec<Todo>, StoreError> {
        let rows = sqlx::query(&format!("{SELECT_TODOS} ORDER BY id"))
            .fetch_all(&mut self.connection)
            .await?;

        Ok(rows.iter().map(todo_from_row).collect::<Result<_, _>>()?)
    }

    async fn create(&mut self, text: &str) -> Result<i64, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"INSERT INTO todos (todo, "createdAt", "updatedAt") VALUES ($1, $2, $2) RETURNING id::int8 AS id"#,
        )
        .bind(text)
        .bind(now)
        .fetch_one(&mut self.connection)
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!(id, "Created todo");
        Ok(id)
    }

    async fn delete_by_id(&mut self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM todos WHERE id = $1")
            .bind(id)
            .execute(&mut self.connection)
            .await?;

        debug!(id, deleted = result.rows_affected(), "Deleted todo");
        Ok(())
    }

    async fn search(&mut self, query: &str) -> Result<Vec<Todo>, StoreError> {
        let rows = sqlx::query(&format!(
            r"{SELECT_TODOS} WHERE todo ILIKE '%' || $1 || '%' ESCAPE '\' ORDER BY id"
        ))
        .bind(escape_like(query))
        .fetch_all(&mut self.connection)
        .await?;

        Ok(rows.iter().map(todo_from_row).collect::<Result<_, _>>()?)
    }
}
