//! SQLite-backed file repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{BackendKind, File, FileInstance, FileInstances, InstancePayload};
use crate::services::repository::FileRepository;

#[derive(Debug, Clone, FromRow)]
struct FileRow {
    id: String,
    filename: Option<String>,
    original_filename: Option<String>,
    mimetype: Option<String>,
    size: Option<i64>,
    path: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct FileInstanceRow {
    id: String,
    storage_component_kind: String,
    uri: Option<String>,
    data_json: Option<String>,
}

impl TryFrom<FileInstanceRow> for FileInstance {
    type Error = AppError;

    fn try_from(row: FileInstanceRow) -> Result<Self> {
        Ok(FileInstance {
            id: Some(row.id),
            kind: BackendKind::parse(&row.storage_component_kind)?,
            uri: row.uri,
            payload: InstancePayload::from_stored(row.data_json.as_deref()),
        })
    }
}

fn size_column(size: Option<u64>) -> Result<Option<i64>> {
    size.map(|s| {
        i64::try_from(s).map_err(|_| AppError::Unsupported(format!("File size {} is too large", s)))
    })
    .transpose()
}

/// Files and instances stored in the `files` and `file_instances` tables
#[derive(Clone)]
pub struct SqliteRepository {
    db: Database,
}

impl SqliteRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn load_instances(&self, file_id: &str) -> Result<FileInstances> {
        let rows: Vec<FileInstanceRow> = sqlx::query_as(
            "SELECT id, storage_component_kind, uri, data_json FROM file_instances WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(FileInstance::try_from).collect()
    }
}

#[async_trait]
impl FileRepository for SqliteRepository {
    async fn assign_identity(&self, file: &mut File) -> Result<String> {
        if let Some(id) = file.id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let id = Uuid::new_v4().to_string();
        file.id = Some(id.clone());
        self.save_file(file).await?;
        tracing::debug!("Assigned identity {}", id);
        Ok(id)
    }

    async fn save_file(&self, file: &File) -> Result<()> {
        let id = file.id.as_deref().ok_or(AppError::IdentityNotAssigned)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO files (id, filename, original_filename, mimetype, size, path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                original_filename = excluded.original_filename,
                mimetype = excluded.mimetype,
                size = excluded.size,
                path = excluded.path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(&file.filename)
        .bind(&file.original_filename)
        .bind(&file.mimetype)
        .bind(size_column(file.size)?)
        .bind(&file.path)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn save_instance(&self, file_id: &str, instance: &mut FileInstance) -> Result<()> {
        let data_json = if instance.payload.is_none() {
            None
        } else {
            Some(serde_json::to_string(&instance.payload)?)
        };
        let now = Utc::now().to_rfc3339();

        // Known rows are updated in place, which also rewrites legacy kind names.
        if let Some(id) = &instance.id {
            let updated = sqlx::query(
                "UPDATE file_instances SET storage_component_kind = ?, uri = ?, data_json = ?, updated_at = ? WHERE id = ? AND file_id = ?",
            )
            .bind(instance.kind.as_str())
            .bind(&instance.uri)
            .bind(&data_json)
            .bind(&now)
            .bind(id)
            .bind(file_id)
            .execute(self.db.pool())
            .await?;
            if updated.rows_affected() > 0 {
                return Ok(());
            }
        }

        let candidate_id = instance
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO file_instances (id, file_id, storage_component_kind, uri, data_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id, storage_component_kind) DO UPDATE SET
                uri = excluded.uri,
                data_json = excluded.data_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&candidate_id)
        .bind(file_id)
        .bind(instance.kind.as_str())
        .bind(&instance.uri)
        .bind(&data_json)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        // An existing row keeps its id.
        let (id,): (String,) = sqlx::query_as(
            "SELECT id FROM file_instances WHERE file_id = ? AND storage_component_kind = ?",
        )
        .bind(file_id)
        .bind(instance.kind.as_str())
        .fetch_one(self.db.pool())
        .await?;

        instance.id = Some(id);
        Ok(())
    }

    async fn load_file(&self, id: &str) -> Result<Option<File>> {
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT id, filename, original_filename, mimetype, size, path FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let instances = self.load_instances(&row.id).await?;
        Ok(Some(File {
            size: row.size.and_then(|s| u64::try_from(s).ok()),
            id: Some(row.id),
            filename: row.filename,
            original_filename: row.original_filename,
            mimetype: row.mimetype,
            path: row.path,
            instances,
        }))
    }
}
