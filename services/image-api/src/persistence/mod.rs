//! Image record persistence.
//!
//! Two interchangeable backends implement [`ImageRepository`]; a request picks
//! one through [`Backend`] and the [`Repositories`] table built at startup.

pub mod mongo;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub use mongo::MongoRepository;
pub use postgres::PostgresRepository;

/// Errors returned by a persistence backend
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Backend returned no identifier for the inserted record")]
    MissingId,
}

/// Opaque record identifier; its format depends on the backend that issued it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored image and its detection metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    /// Original file name, also the object-storage key
    pub name: String,
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub url_resize: Option<String>,
    pub date_added: Option<NaiveDate>,
    pub date_identified: Option<NaiveDate>,
    pub ai_labels: Vec<String>,
    pub ai_text: Vec<String>,
}

/// Fields supplied when inserting a record
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub name: String,
    pub url: String,
    pub ai_labels: Vec<String>,
    pub ai_text: Vec<String>,
}

/// Storage contract shared by every backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// All records, newest first
    async fn list_all(&self) -> Result<Vec<ImageRecord>, PersistenceError>;

    /// `None` when no record has this id, including ids this backend cannot parse
    async fn get_by_id(&self, id: &ImageId) -> Result<Option<ImageRecord>, PersistenceError>;

    async fn insert(&self, image: NewImage) -> Result<ImageId, PersistenceError>;

    /// Number of records removed (0 or 1)
    async fn delete_by_id(&self, id: &ImageId) -> Result<u64, PersistenceError>;

    /// Cheap round-trip used by the readiness probe
    async fn ping(&self) -> Result<(), PersistenceError>;
}

/// Persistence backend selectable per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Mongo,
    Postgres,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Mongo, Backend::Postgres];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mongo => "mongo",
            Backend::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown backend '{0}', expected 'mongo' or 'postgres'")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| UnknownBackend(s.to_string()))
    }
}

/// Lookup table from backend to its repository
#[derive(Clone, Default)]
pub struct Repositories {
    by_backend: HashMap<Backend, Arc<dyn ImageRepository>>,
}

impl Repositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Backend, repository: Arc<dyn ImageRepository>) -> Self {
        self.by_backend.insert(backend, repository);
        self
    }

    pub fn get(&self, backend: Backend) -> Option<&Arc<dyn ImageRepository>> {
        self.by_backend.get(&backend)
    }

    /// Configured backends in a stable order
    pub fn iter(&self) -> impl Iterator<Item = (Backend, &Arc<dyn ImageRepository>)> {
        Backend::ALL
            .into_iter()
            .filter_map(|b| self.by_backend.get(&b).map(|repo| (b, repo)))
    }

    pub fn is_empty(&self) -> bool {
        self.by_backend.is_empty()
    }
}
