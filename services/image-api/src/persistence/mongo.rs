use super::{ImageId, ImageRecord, ImageRepository, NewImage, PersistenceError};
use crate::config::MongoConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Document shape of the images collection
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url_resize: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_added: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_identified: Option<NaiveDate>,
    #[serde(default)]
    ai_labels: Vec<String>,
    #[serde(default)]
    ai_text: Vec<String>,
}

impl From<NewImage> for ImageDocument {
    fn from(image: NewImage) -> Self {
        Self {
            id: None,
            name: image.name,
            url: Some(image.url),
            width: None,
            height: None,
            url_resize: None,
            date_added: None,
            date_identified: None,
            ai_labels: image.ai_labels,
            ai_text: image.ai_text,
        }
    }
}

impl ImageDocument {
    fn into_record(self) -> Option<ImageRecord> {
        Some(ImageRecord {
            id: ImageId::new(self.id?.to_hex()),
            name: self.name,
            url: self.url.unwrap_or_default(),
            width: self.width,
            height: self.height,
            url_resize: self.url_resize,
            date_added: self.date_added,
            date_identified: self.date_identified,
            ai_labels: self.ai_labels,
            ai_text: self.ai_text,
        })
    }
}

/// MongoDB-backed image repository; the driver pools connections internally
pub struct MongoRepository {
    client: Client,
    collection: Collection<ImageDocument>,
}

impl MongoRepository {
    pub async fn new(config: &MongoConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .context("Failed to parse MongoDB connection string")?;

        options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        options.max_pool_size = Some(config.max_pool_size);
        options.min_pool_size = Some(config.min_pool_size);
        options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));

        let client = Client::with_options(options).context("Failed to create MongoDB client")?;
        let collection = client
            .database(&config.database)
            .collection::<ImageDocument>(&config.collection);

        let repository = Self { client, collection };
        repository
            .ping()
            .await
            .context("Failed to reach MongoDB")?;

        info!(
            database = %config.database,
            collection = %config.collection,
            "Connected to MongoDB"
        );

        Ok(repository)
    }
}

/// Mongo ids are ObjectIds; anything else cannot name a document
fn parse_id(id: &ImageId) -> Option<ObjectId> {
    ObjectId::parse_str(id.as_str()).ok()
}

#[async_trait]
impl ImageRepository for MongoRepository {
    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<ImageRecord>, PersistenceError> {
        // ObjectIds embed their creation time, so _id descending is newest first
        let documents: Vec<ImageDocument> = self
            .collection
            .find(doc! {})
            .sort(doc! { "_id": -1 })
            .await?
            .try_collect()
            .await?;

        Ok(documents
            .into_iter()
            .filter_map(ImageDocument::into_record)
            .collect())
    }

    #[instrument(skip(self, id), fields(id = %id))]
    async fn get_by_id(&self, id: &ImageId) -> Result<Option<ImageRecord>, PersistenceError> {
        let Some(oid) = parse_id(id) else {
            return Ok(None);
        };

        let document = self.collection.find_one(doc! { "_id": oid }).await?;
        Ok(document.and_then(ImageDocument::into_record))
    }

    #[instrument(skip(self, image), fields(name = %image.name))]
    async fn insert(&self, image: NewImage) -> Result<ImageId, PersistenceError> {
        let result = self
            .collection
            .insert_one(ImageDocument::from(image))
            .await?;

        let oid = result
            .inserted_id
            .as_object_id()
            .ok_or(PersistenceError::MissingId)?;

        debug!(id = %oid, "Image document inserted");
        metrics::counter!("images.inserted", "backend" => "mongo").increment(1);

        Ok(ImageId::new(oid.to_hex()))
    }

    #[instrument(skip(self, id), fields(id = %id))]
    async fn delete_by_id(&self, id: &ImageId) -> Result<u64, PersistenceError> {
        let Some(oid) = parse_id(id) else {
            return Ok(0);
        };

        let result = self.collection.delete_one(doc! { "_id": oid }).await?;
        Ok(result.deleted_count)
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}
