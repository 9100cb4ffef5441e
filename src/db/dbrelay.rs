use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, error, info};

use super::DocumentStore;
use crate::models::{empty_snapshot, is_valid_document_id, Document, Snapshot, StoreError};

const CREATE_DOCUMENTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

/// Document Row from database
#[derive(Debug, Clone, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: Json<Snapshot>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            data: row.data.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Postgres-backed document store
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new database connection pool and make sure the schema exists
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_DOCUMENTS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create documents table: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn load_or_create(&self, id: &str) -> Result<Document, StoreError> {
        if !is_valid_document_id(id) {
            return Err(StoreError::InvalidId);
        }

        // The primary key makes a racing insert a no-op.
        let inserted = sqlx::query(
            "INSERT INTO documents (id, data) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(Json(empty_snapshot()))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            info!("Created document {}", id);
        }

        let row: DocumentRow = sqlx::query_as(
            "SELECT id, data, created_at, updated_at FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn save(&self, id: &str, data: Snapshot) -> Result<(), StoreError> {
        if !is_valid_document_id(id) {
            return Err(StoreError::InvalidId);
        }

        let result = sqlx::query("UPDATE documents SET data = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(Json(data))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownDocument(id.to_string()));
        }
        debug!("Saved document {}", id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
