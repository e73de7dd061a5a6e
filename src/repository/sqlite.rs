use super::{ImageRepository, NEW_RECORD_VERSION};
use crate::models::{Image, Rendition};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const IMAGE_COLUMNS: &str =
    "id, path, client_name, mime_type, byte_size, uploaded_at, sizes, version";

/// SQLite-backed image metadata.
///
/// Renditions live in a JSON column; `seq` preserves insertion order for
/// listing. Blocking driver calls run on tokio's blocking pool.
pub struct SqliteImageRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteImageRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let repository = Self::with_connection(Connection::open(path)?)?;
        info!("Image database opened at {}", path.display());
        Ok(repository)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT NOT NULL UNIQUE,
                path        TEXT NOT NULL,
                client_name TEXT NOT NULL,
                mime_type   TEXT NOT NULL,
                byte_size   INTEGER NOT NULL,
                uploaded_at TEXT NOT NULL,
                sizes       TEXT NOT NULL,
                version     INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Repository("Connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Task(format!("Database task join error: {}", e)))?
    }
}

struct ImageRow {
    id: String,
    path: String,
    client_name: String,
    mime_type: String,
    byte_size: i64,
    uploaded_at: String,
    sizes: String,
    version: i64,
}

impl ImageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            client_name: row.get(2)?,
            mime_type: row.get(3)?,
            byte_size: row.get(4)?,
            uploaded_at: row.get(5)?,
            sizes: row.get(6)?,
            version: row.get(7)?,
        })
    }

    fn from_image(image: &Image) -> Result<Self> {
        Ok(Self {
            id: image.id.clone(),
            path: image.path.clone(),
            client_name: image.client_name.clone(),
            mime_type: image.mime_type.clone(),
            byte_size: to_sql_int(image.byte_size, "byte_size")?,
            uploaded_at: image.uploaded_at.to_rfc3339(),
            sizes: serde_json::to_string(&image.sizes)?,
            version: to_sql_int(image.version, "version")?,
        })
    }
}

impl TryFrom<ImageRow> for Image {
    type Error = Error;

    fn try_from(row: ImageRow) -> Result<Self> {
        let uploaded_at = DateTime::parse_from_rfc3339(&row.uploaded_at)
            .map_err(|e| Error::Repository(format!("Invalid uploaded_at for {}: {}", row.id, e)))?
            .with_timezone(&Utc);
        let sizes: Vec<Rendition> = serde_json::from_str(&row.sizes)?;

        Ok(Image {
            byte_size: from_sql_int(row.byte_size, "byte_size")?,
            version: from_sql_int(row.version, "version")?,
            id: row.id,
            path: row.path,
            client_name: row.client_name,
            mime_type: row.mime_type,
            uploaded_at,
            sizes,
        })
    }
}

fn to_sql_int(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Repository(format!("{} out of range: {}", column, value)))
}

fn from_sql_int(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Repository(format!("{} out of range: {}", column, value)))
}

#[async_trait]
impl ImageRepository for SqliteImageRepository {
    async fn get(&self, id: &str) -> Result<Image> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM images WHERE id = ?1", IMAGE_COLUMNS),
                    params![id],
                    ImageRow::from_row,
                )
                .optional()?;

            match row {
                Some(row) => Image::try_from(row),
                None => Err(Error::NotFound(id)),
            }
        })
        .await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Image>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut statement = conn.prepare(&format!(
                "SELECT {} FROM images ORDER BY seq LIMIT ?1 OFFSET ?2",
                IMAGE_COLUMNS
            ))?;
            let rows = statement
                .query_map(params![limit, offset], ImageRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter().map(Image::try_from).collect()
        })
        .await
    }

    async fn save(&self, expected_version: u64, image: &Image) -> Result<()> {
        let row = ImageRow::from_image(image)?;
        let expected = to_sql_int(expected_version, "version")?;

        self.with_conn(move |conn| {
            if expected_version == NEW_RECORD_VERSION {
                conn.execute(
                    &format!(
                        "INSERT INTO images ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        IMAGE_COLUMNS
                    ),
                    params![
                        row.id,
                        row.path,
                        row.client_name,
                        row.mime_type,
                        row.byte_size,
                        row.uploaded_at,
                        row.sizes,
                        row.version
                    ],
                )?;
                debug!("Inserted image {} at version {}", row.id, row.version);
                return Ok(());
            }

            let updated = conn.execute(
                "UPDATE images
                 SET path = ?1, client_name = ?2, mime_type = ?3, byte_size = ?4,
                     uploaded_at = ?5, sizes = ?6, version = ?7
                 WHERE id = ?8 AND version = ?9",
                params![
                    row.path,
                    row.client_name,
                    row.mime_type,
                    row.byte_size,
                    row.uploaded_at,
                    row.sizes,
                    row.version,
                    row.id,
                    expected
                ],
            )?;

            if updated == 0 {
                return Err(Error::RaceCondition {
                    id: row.id,
                    expected_version,
                });
            }
            debug!("Updated image {} to version {}", row.id, row.version);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn image(name: &str) -> Image {
        Image::new(
            format!("2024/01/01/origin/{}", name),
            format!("{}.png", name),
            "image/png".to_string(),
            123,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let repo = SqliteImageRepository::in_memory().unwrap();
        let mut image = image("a");
        image.add_rendition("2024/01/01/100_200/x.png".to_string(), 100, 200);

        repo.save(NEW_RECORD_VERSION, &image).await.unwrap();

        let stored = repo.get(&image.id).await.unwrap();
        assert_eq!(stored.id, image.id);
        assert_eq!(stored.sizes, image.sizes);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.uploaded_at, image.uploaded_at);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo = SqliteImageRepository::in_memory().unwrap();
        let err = repo.get("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let repo = SqliteImageRepository::in_memory().unwrap();
        let image = image("a");

        repo.save(NEW_RECORD_VERSION, &image).await.unwrap();
        let err = repo.save(NEW_RECORD_VERSION, &image).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let repo = SqliteImageRepository::in_memory().unwrap();
        let mut image = image("a");
        repo.save(NEW_RECORD_VERSION, &image).await.unwrap();

        image.add_rendition("r1".to_string(), 10, 10);
        image.version = 2;
        repo.save(1, &image).await.unwrap();

        let stored = repo.get(&image.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.sizes.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_update_is_race_condition() {
        let repo = SqliteImageRepository::in_memory().unwrap();
        let mut first = image("a");
        repo.save(NEW_RECORD_VERSION, &first).await.unwrap();
        let mut second = first.clone();

        first.add_rendition("r1".to_string(), 10, 10);
        first.version = 2;
        repo.save(1, &first).await.unwrap();

        second.add_rendition("r2".to_string(), 20, 20);
        second.version = 2;
        let err = repo.save(1, &second).await.unwrap_err();
        assert!(matches!(err, Error::RaceCondition { expected_version: 1, .. }));

        let stored = repo.get(&first.id).await.unwrap();
        assert_eq!(stored.sizes[0].path, "r1");
    }

    #[tokio::test]
    async fn test_update_of_missing_record_is_race_condition() {
        let repo = SqliteImageRepository::in_memory().unwrap();
        let err = repo.save(1, &image("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::RaceCondition { .. }));
    }

    #[tokio::test]
    async fn test_list_paginates_in_insertion_order() {
        let repo = SqliteImageRepository::in_memory().unwrap();
        let images: Vec<Image> = ["a", "b", "c"].iter().map(|n| image(n)).collect();
        for image in &images {
            repo.save(NEW_RECORD_VERSION, image).await.unwrap();
        }

        let page: Vec<String> = repo
            .list(2, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.client_name)
            .collect();
        assert_eq!(page, vec!["b.png".to_string(), "c.png".to_string()]);
        assert!(repo.list(10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("images.db");
        let image = image("a");

        {
            let repo = SqliteImageRepository::open(&path).unwrap();
            repo.save(NEW_RECORD_VERSION, &image).await.unwrap();
        }

        let repo = SqliteImageRepository::open(&path).unwrap();
        assert_eq!(repo.get(&image.id).await.unwrap().client_name, "a.png");
    }
}
