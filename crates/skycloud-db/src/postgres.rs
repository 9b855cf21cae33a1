use crate::repository::FileRepository;
use chrono::{DateTime, Utc};
use skycloud_core::models::{
    FileRecord, MetricSnapshot, NewFileRecord, UsageStats, MAX_THUMBNAIL_ATTEMPTS,
};
use skycloud_core::AppError;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, name, original_name, mimetype, size, created_at, deletes_at, \
     views, max_views, password, folder_id, thumbnail, thumbnail_attempts";

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed file repository
#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FileRepository for PgFileRepository {
    #[tracing::instrument(skip(self, file), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "insert",
        file.name = %file.name
    ))]
    async fn create_file_record(&self, file: NewFileRecord) -> Result<FileRecord, AppError> {
        let query = format!(
            r#"
            INSERT INTO files (id, name, original_name, mimetype, size, deletes_at, max_views, password, folder_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            FILE_COLUMNS
        );

        let name = file.name.clone();
        sqlx::query_as::<Postgres, FileRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(&file.name)
            .bind(&file.original_name)
            .bind(&file.mimetype)
            .bind(file.size)
            .bind(file.deletes_at)
            .bind(file.max_views)
            .bind(&file.password)
            .bind(&file.folder_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let duplicate = e
                    .as_database_error()
                    .and_then(|db| db.code())
                    .is_some_and(|code| code == UNIQUE_VIOLATION);
                if duplicate {
                    AppError::Conflict(format!("A file named {} already exists", name))
                } else {
                    AppError::from(e)
                }
            })
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn get_by_name(&self, name: &str) -> Result<Option<FileRecord>, AppError> {
        let query = format!("SELECT {} FROM files WHERE name = $1", FILE_COLUMNS);
        let file = sqlx::query_as::<Postgres, FileRecord>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(file)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM files WHERE deletes_at IS NOT NULL AND deletes_at <= $1 ORDER BY deletes_at ASC",
            FILE_COLUMNS
        );
        let files = sqlx::query_as::<Postgres, FileRecord>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(files)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn find_max_viewed(&self) -> Result<Vec<FileRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM files WHERE max_views IS NOT NULL AND views >= max_views",
            FILE_COLUMNS
        );
        let files = sqlx::query_as::<Postgres, FileRecord>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(files)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn increment_view_count(&self, id: Uuid) -> Result<i64, AppError> {
        let views = sqlx::query_scalar::<Postgres, i64>(
            "UPDATE files SET views = views + 1 WHERE id = $1 RETURNING views",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        views.ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "delete", db.record_id = %id))]
    async fn delete_file_record(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn find_missing_thumbnails(&self, limit: i64) -> Result<Vec<FileRecord>, AppError> {
        let query = format!(
            r#"
            SELECT {} FROM files
            WHERE thumbnail IS NULL
              AND thumbnail_attempts < $2
              AND (mimetype LIKE 'image/%' OR mimetype LIKE 'video/%')
            ORDER BY created_at ASC
            LIMIT $1
            "#,
            FILE_COLUMNS
        );
        let files = sqlx::query_as::<Postgres, FileRecord>(&query)
            .bind(limit)
            .bind(MAX_THUMBNAIL_ATTEMPTS)
            .fetch_all(&self.pool)
            .await?;

        Ok(files)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn set_thumbnail(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE files SET thumbnail = $2 WHERE id = $1")
            .bind(id)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn record_thumbnail_failure(&self, id: Uuid) -> Result<i32, AppError> {
        let attempts = sqlx::query_scalar::<Postgres, i32>(
            "UPDATE files SET thumbnail_attempts = thumbnail_attempts + 1 WHERE id = $1 RETURNING thumbnail_attempts",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "aggregate"))]
    async fn usage_stats(&self) -> Result<UsageStats, AppError> {
        let totals = sqlx::query(
            "SELECT COUNT(*)::BIGINT AS files, COALESCE(SUM(size), 0)::BIGINT AS bytes, \
             COALESCE(SUM(views), 0)::BIGINT AS views FROM files",
        )
        .fetch_one(&self.pool)
        .await?;

        let type_rows = sqlx::query(
            "SELECT mimetype, COUNT(*)::BIGINT AS count FROM files GROUP BY mimetype",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut types = BTreeMap::new();
        for row in type_rows {
            let mimetype: String = row.get("mimetype");
            let count: i64 = row.get("count");
            types.insert(mimetype, count.max(0) as u64);
        }

        Ok(UsageStats {
            files: totals.get::<i64, _>("files").max(0) as u64,
            storage_bytes: totals.get::<i64, _>("bytes").max(0) as u64,
            views: totals.get::<i64, _>("views").max(0) as u64,
            types,
        })
    }

    #[tracing::instrument(skip(self, stats), fields(db.table = "metrics", db.operation = "insert"))]
    async fn record_metric_snapshot(&self, stats: UsageStats) -> Result<MetricSnapshot, AppError> {
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = sqlx::query_scalar::<Postgres, DateTime<Utc>>(
            "INSERT INTO metrics (id, data) VALUES ($1, $2) RETURNING created_at",
        )
        .bind(id)
        .bind(Json(&stats))
        .fetch_one(&self.pool)
        .await?;

        Ok(MetricSnapshot {
            id,
            created_at,
            data: stats,
        })
    }
}
