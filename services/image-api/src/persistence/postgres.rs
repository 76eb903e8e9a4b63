use super::{ImageId, ImageRecord, ImageRepository, NewImage, PersistenceError};
use crate::config::PostgresConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

/// Row shape of the `images` table
#[derive(Debug, Clone, FromRow)]
struct ImageRow {
    id: i32,
    name: String,
    width: Option<i32>,
    height: Option<i32>,
    url: Option<String>,
    url_resize: Option<String>,
    date_added: Option<NaiveDate>,
    date_identified: Option<NaiveDate>,
    ai_labels: Option<Vec<String>>,
    ai_text: Option<Vec<String>>,
}

impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        Self {
            id: ImageId::new(row.id.to_string()),
            name: row.name,
            url: row.url.unwrap_or_default(),
            width: row.width,
            height: row.height,
            url_resize: row.url_resize,
            date_added: row.date_added,
            date_identified: row.date_identified,
            ai_labels: row.ai_labels.unwrap_or_default(),
            ai_text: row.ai_text.unwrap_or_default(),
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, width, height, url, url_resize,
           date_added, date_identified, ai_labels, ai_text
    FROM images
"#;

/// PostgreSQL-backed image repository
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Create a new repository with its connection pool
    pub async fn new(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .test_before_acquire(true)
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

/// Postgres ids are integers; anything else cannot name a row
fn parse_id(id: &ImageId) -> Option<i32> {
    id.as_str().parse().ok()
}

#[async_trait]
impl ImageRepository for PostgresRepository {
    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<ImageRecord>, PersistenceError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY id DESC");

        let rows = sqlx::query_as::<_, ImageRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, id), fields(id = %id))]
    async fn get_by_id(&self, id: &ImageId) -> Result<Option<ImageRecord>, PersistenceError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1");

        let row = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, image), fields(name = %image.name))]
    async fn insert(&self, image: NewImage) -> Result<ImageId, PersistenceError> {
        let (id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO images (name, url, ai_labels, ai_text)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&image.name)
        .bind(&image.url)
        .bind(&image.ai_labels)
        .bind(&image.ai_text)
        .fetch_one(&self.pool)
        .await?;

        debug!(id = id, "Image row inserted");
        metrics::counter!("images.inserted", "backend" => "postgres").increment(1);

        Ok(ImageId::new(id.to_string()))
    }

    #[instrument(skip(self, id), fields(id = %id))]
    async fn delete_by_id(&self, id: &ImageId) -> Result<u64, PersistenceError> {
        let Some(id) = parse_id(id) else {
            return Ok(0);
        };

        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
