//! Image API
//!
//! Backend for the gallery frontend. Uploaded images are stored in S3,
//! analyzed with Amazon Rekognition (labels, text lines, moderation flags),
//! checked against a small keyword policy, and catalogued in either MongoDB
//! or PostgreSQL, chosen per request.
//!
//! ## Request flow
//!
//! ```text
//! POST /add_image
//!   ┌──────────┐    ┌──────────────┐    ┌──────────┐    ┌──────────────┐
//!   │ S3 Store │───▶│ Rekognition  │───▶│ Content  │───▶│ Repository   │
//!   │ upload   │    │ labels/text/ │    │ Policy   │    │ insert       │
//!   └──────────┘    │ moderation   │    └──────────┘    │ (mongo | pg) │
//!                   └──────────────┘                    └──────────────┘
//!
//! DELETE /delete_image/{id}
//!   Repository lookup ──▶ Repository delete ──▶ S3 delete (key = name)
//! ```
//!
//! Nothing here is transactional: a stored object whose insert failed, or
//! whose delete failed after the row was removed, is reported and left behind.

pub mod analysis;
pub mod api;
pub mod config;
pub mod persistence;
pub mod policy;
pub mod reporter;
pub mod service;
pub mod storage;

#[cfg(test)]
mod testing;

pub use analysis::{Analysis, AnalysisError, DetectionFilter, ImageAnalyzer, RekognitionAnalyzer};
pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use persistence::{
    Backend, ImageId, ImageRecord, ImageRepository, MongoRepository, PersistenceError,
    PostgresRepository, Repositories,
};
pub use policy::{ContentPolicy, PolicyVerdict};
pub use reporter::{ErrorReporter, SentryReporter};
pub use service::{AddImageOutcome, DeleteOutcome, ImageService, ServiceError};
pub use storage::{ObjectStore, S3Store, StorageError};
