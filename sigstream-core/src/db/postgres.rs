use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use sigstream_model::{NewSignature, Record};

use super::ports::{RecordsRepository, SignaturesRepository};
use crate::error::Result;

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id          BIGSERIAL PRIMARY KEY,
    inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS signatures (
    record_id   BIGINT PRIMARY KEY REFERENCES records (id),
    key_id      BIGINT NOT NULL CHECK (key_id > 0),
    value       TEXT NOT NULL CHECK (value <> ''),
    inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS signatures_value_key ON signatures (value);
"#;

#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    max_connections: u32,
}

impl fmt::Debug for PostgresDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresDatabase")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl PostgresDatabase {
    pub async fn connect(connection_string: &str) -> Result<Self> {
        // Pool sized for bulk-insert fan-out; override via env.
        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get() as u32)
                    .unwrap_or(4)
            });

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(connection_string)
            .await?;

        info!(max_connections, "database connection established");
        Ok(Self {
            pool,
            max_connections,
        })
    }

    /// Create the pipeline tables if they do not exist, including the
    /// unique index backing the global signature-value invariant.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_DDL).execute(&self.pool).await?;
        Ok(())
    }

    pub fn records(&self) -> PostgresRecordsRepository {
        PostgresRecordsRepository {
            pool: self.pool.clone(),
        }
    }

    pub fn signatures(&self) -> PostgresSignaturesRepository {
        PostgresSignaturesRepository {
            pool: self.pool.clone(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    inserted_at: DateTime<Utc>,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record {
            id: row.id,
            inserted_at: row.inserted_at,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PostgresRecordsRepository {
    pool: PgPool,
}

#[async_trait::async_trait]
impl RecordsRepository for PostgresRecordsRepository {
    async fn records_in_batch(
        &self,
        batch_id: i64,
        total_batches: i64,
    ) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, inserted_at
            FROM records
            WHERE ((id - 1) % $1) + 1 = $2
            ORDER BY id
            "#,
        )
        .bind(total_batches)
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Record::from).collect())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn seed(&self, total: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO records (inserted_at)
            SELECT now()
            FROM generate_series(1, $1)
            "#,
        )
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM records")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PostgresSignaturesRepository {
    pool: PgPool,
}

#[async_trait::async_trait]
impl SignaturesRepository for PostgresSignaturesRepository {
    async fn insert_bulk(&self, signatures: &[NewSignature]) -> Result<()> {
        if signatures.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO signatures (record_id, key_id, value) ",
        );
        builder.push_values(signatures, |mut row, sig| {
            row.push_bind(sig.record_id)
                .push_bind(sig.key_id)
                .push_bind(&sig.value);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM signatures")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM signatures")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
