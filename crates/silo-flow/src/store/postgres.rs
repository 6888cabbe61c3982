//! Postgres-backed store over the `wh_staging_files` / `wh_uploads`
//! tables.
//!
//! Query shape matters here: every read is a single statement and every
//! write is an unconditional insert. Concurrency control lives in the
//! in-progress registry, not in SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::binding::WarehouseBinding;
use crate::error::{Error, Result};
use crate::model::{
    PendingUpload, StagingFile, Upload, UploadState, STAGING_FILE_WAITING_STATE,
};
use crate::store::{StagingFileDescriptor, WarehouseStore};

/// Fixed table names, shared with the ingress and the parsing pool.
pub const STAGING_FILES_TABLE: &str = "wh_staging_files";
/// Uploads table name.
pub const UPLOADS_TABLE: &str = "wh_uploads";
/// Migration bookkeeping table name.
pub const SCHEMA_MIGRATIONS_TABLE: &str = "wh_schema_migrations";

const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "create_warehouse_tables",
    include_str!("../../migrations/0001_create_warehouse_tables.sql"),
)];

/// Applies pending schema migrations, bookkept in
/// `wh_schema_migrations`.
///
/// Each migration runs in its own transaction together with its
/// bookkeeping row, so a crash mid-migration leaves the version
/// unrecorded and the statement set re-runs on restart (all statements
/// are idempotent).
///
/// # Errors
///
/// Returns a storage error when a migration cannot be applied; callers
/// treat this as fatal.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS wh_schema_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    for &(version, name, sql) in MIGRATIONS {
        let applied: Option<i64> =
            sqlx::query_scalar("SELECT version FROM wh_schema_migrations WHERE version = $1")
                .bind(version)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }

        tracing::info!(version, name, "applying warehouse schema migration");
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO wh_schema_migrations (version, name) VALUES ($1, $2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}

/// Postgres [`WarehouseStore`] implementation.
#[derive(Debug, Clone)]
pub struct PgWarehouseStore {
    pool: PgPool,
}

impl PgWarehouseStore {
    /// Creates a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for collaborators that share the handle.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn staging_file_from_row(row: &PgRow) -> Result<StagingFile> {
    Ok(StagingFile {
        id: row.try_get("id")?,
        location: row.try_get("location")?,
        source_id: row.try_get("source_id")?,
        destination_id: row.try_get("destination_id")?,
        schema: row.try_get("schema")?,
        status: row.try_get("status")?,
        total_events: row.try_get("total_events")?,
        first_event_at: row.try_get("first_event_at")?,
        last_event_at: row.try_get("last_event_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn upload_from_row(row: &PgRow) -> Result<Upload> {
    let status: String = row.try_get("status")?;
    Ok(Upload {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        namespace: row.try_get("namespace")?,
        destination_id: row.try_get("destination_id")?,
        destination_type: row.try_get("destination_type")?,
        start_staging_file_id: row.try_get("start_staging_file_id")?,
        end_staging_file_id: row.try_get("end_staging_file_id")?,
        start_load_file_id: row.try_get("start_load_file_id")?,
        end_load_file_id: row.try_get("end_load_file_id")?,
        status: status.parse()?,
        schema: row.try_get("schema")?,
        error: row.try_get("error")?,
        timings: row.try_get("timings")?,
        first_event_at: row.try_get("first_event_at")?,
        last_event_at: row.try_get("last_event_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl WarehouseStore for PgWarehouseStore {
    async fn pending_staging_files(&self, binding: &WarehouseBinding) -> Result<Vec<StagingFile>> {
        let last_covered: Option<i64> = sqlx::query_scalar(
            "SELECT end_staging_file_id FROM wh_uploads
             WHERE destination_type = $1 AND source_id = $2 AND destination_id = $3
               AND (status = $4 OR status = $5)
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(binding.destination_type.as_str())
        .bind(&binding.source_id)
        .bind(&binding.destination_id)
        .bind(UploadState::ExportedData.as_str())
        .bind(UploadState::Aborted.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT id, location, source_id, destination_id, schema, status, total_events,
                    first_event_at, last_event_at, created_at, updated_at
             FROM wh_staging_files
             WHERE id > $1 AND source_id = $2 AND destination_id = $3
             ORDER BY id ASC",
        )
        .bind(last_covered.unwrap_or(0))
        .bind(&binding.source_id)
        .bind(&binding.destination_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(staging_file_from_row).collect()
    }

    async fn staging_files_in_range(
        &self,
        binding: &WarehouseBinding,
        start_id: i64,
        end_id: i64,
    ) -> Result<Vec<StagingFile>> {
        let rows = sqlx::query(
            "SELECT id, location, source_id, destination_id, schema, status, total_events,
                    first_event_at, last_event_at, created_at, updated_at
             FROM wh_staging_files
             WHERE id >= $1 AND id <= $2 AND source_id = $3 AND destination_id = $4
             ORDER BY id ASC",
        )
        .bind(start_id)
        .bind(end_id)
        .bind(&binding.source_id)
        .bind(&binding.destination_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(staging_file_from_row).collect()
    }

    async fn pending_uploads(&self, binding: &WarehouseBinding) -> Result<Vec<PendingUpload>> {
        let rows = sqlx::query(
            "SELECT id, source_id, namespace, destination_id, destination_type,
                    start_staging_file_id, end_staging_file_id,
                    start_load_file_id, end_load_file_id,
                    status, schema, error, timings,
                    first_event_at, last_event_at, created_at, updated_at
             FROM wh_uploads
             WHERE destination_type = $1 AND source_id = $2 AND destination_id = $3
               AND status != $4 AND status != $5
             ORDER BY id ASC",
        )
        .bind(binding.destination_type.as_str())
        .bind(&binding.source_id)
        .bind(&binding.destination_id)
        .bind(UploadState::ExportedData.as_str())
        .bind(UploadState::Aborted.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| upload_from_row(row).map(PendingUpload::from))
            .collect()
    }

    async fn create_upload(
        &self,
        binding: &WarehouseBinding,
        files: &[StagingFile],
    ) -> Result<Upload> {
        let Some(first) = files.first() else {
            return Err(Error::storage("create_upload called with no staging files"));
        };
        let last = files.last().unwrap_or(first);
        let first_event_at: Option<DateTime<Utc>> = first.first_event_at;
        let last_event_at: Option<DateTime<Utc>> = last.last_event_at;
        let now = Utc::now();

        let row = sqlx::query(
            "INSERT INTO wh_uploads
                 (source_id, namespace, destination_id, destination_type,
                  start_staging_file_id, end_staging_file_id,
                  start_load_file_id, end_load_file_id,
                  status, schema, error, timings,
                  first_event_at, last_event_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
             RETURNING id, source_id, namespace, destination_id, destination_type,
                       start_staging_file_id, end_staging_file_id,
                       start_load_file_id, end_load_file_id,
                       status, schema, error, timings,
                       first_event_at, last_event_at, created_at, updated_at",
        )
        .bind(&binding.source_id)
        .bind(&binding.namespace)
        .bind(&binding.destination_id)
        .bind(binding.destination_type.as_str())
        .bind(first.id)
        .bind(last.id)
        .bind(0_i64)
        .bind(0_i64)
        .bind(UploadState::Waiting.as_str())
        .bind(Value::Object(serde_json::Map::new()))
        .bind(Value::Object(serde_json::Map::new()))
        .bind(Value::Array(Vec::new()))
        .bind(first_event_at)
        .bind(last_event_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        upload_from_row(&row)
    }

    async fn crash_interrupted_destinations(&self, dest_type: &str) -> Result<Vec<String>> {
        let destinations: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT destination_id FROM wh_uploads
             WHERE destination_type = $1 AND (status = $2 OR status = $3)",
        )
        .bind(dest_type)
        .bind(UploadState::ExportingData.as_str())
        .bind(UploadState::ExportingDataFailed.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(destinations)
    }

    async fn insert_staging_file(&self, descriptor: &StagingFileDescriptor) -> Result<i64> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO wh_staging_files
                 (location, schema, source_id, destination_id, status, total_events,
                  first_event_at, last_event_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
             RETURNING id",
        )
        .bind(&descriptor.location)
        .bind(&descriptor.schema)
        .bind(&descriptor.source_id)
        .bind(&descriptor.destination_id)
        .bind(STAGING_FILE_WAITING_STATE)
        .bind(descriptor.total_events)
        .bind(descriptor.first_event_at)
        .bind(descriptor.last_event_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn latest_upload_statuses(
        &self,
        binding: &WarehouseBinding,
        limit: usize,
    ) -> Result<Vec<(i64, UploadState)>> {
        let rows = sqlx::query(
            "SELECT id, status FROM wh_uploads
             WHERE source_id = $1 AND destination_id = $2
             ORDER BY id DESC
             LIMIT $3",
        )
        .bind(&binding.source_id)
        .bind(&binding.destination_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let status: String = row.try_get("status")?;
                Ok((id, status.parse()?))
            })
            .collect()
    }

    async fn last_recorded_namespace(
        &self,
        source_id: &str,
        destination_id: &str,
    ) -> Result<Option<String>> {
        let namespace: Option<String> = sqlx::query_scalar(
            "SELECT namespace FROM wh_uploads
             WHERE source_id = $1 AND destination_id = $2
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(source_id)
        .bind(destination_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(namespace)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_versioned_monotonically() {
        let mut last = 0;
        for &(version, name, sql) in MIGRATIONS {
            assert!(version > last, "migration versions must ascend");
            assert!(!name.is_empty());
            assert!(sql.contains("CREATE TABLE IF NOT EXISTS"));
            last = version;
        }
    }

    #[test]
    fn initial_migration_creates_both_tables() {
        let (_, _, sql) = MIGRATIONS[0];
        assert!(sql.contains(STAGING_FILES_TABLE));
        assert!(sql.contains(UPLOADS_TABLE));
    }
}
