use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failed thumbnail renders after which a file is no longer retried.
pub const MAX_THUMBNAIL_ATTEMPTS: i32 = 3;

/// Metadata of a stored artifact, owned by the persistence provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct FileRecord {
    pub id: Uuid,
    /// Storage key of the artifact (unqualified; backends apply their own prefix).
    pub name: String,
    pub original_name: Option<String>,
    pub mimetype: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub deletes_at: Option<DateTime<Utc>>,
    pub views: i64,
    pub max_views: Option<i64>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub folder_id: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnail_attempts: i32,
}

impl FileRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deletes_at.is_some_and(|at| at <= now)
    }

    pub fn has_reached_max_views(&self) -> bool {
        self.max_views.is_some_and(|max| self.views >= max)
    }

    /// Images and videos get thumbnails until rendering has failed too often.
    pub fn wants_thumbnail(&self) -> bool {
        self.thumbnail.is_none()
            && self.thumbnail_attempts < MAX_THUMBNAIL_ATTEMPTS
            && (self.mimetype.starts_with("image/") || self.mimetype.starts_with("video/"))
    }
}

/// Fields required to create a [`FileRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub name: String,
    pub original_name: Option<String>,
    pub mimetype: String,
    pub size: i64,
    pub deletes_at: Option<DateTime<Utc>>,
    pub max_views: Option<i64>,
    /// Already hashed.
    pub password: Option<String>,
    pub folder_id: Option<String>,
}

impl NewFileRecord {
    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            name: self.name,
            original_name: self.original_name,
            mimetype: self.mimetype,
            size: self.size,
            created_at,
            deletes_at: self.deletes_at,
            views: 0,
            max_views: self.max_views,
            password: self.password,
            folder_id: self.folder_id,
            thumbnail: None,
            thumbnail_attempts: 0,
        }
    }
}
