use crate::analysis::{analyze, AnalysisError, DetectionFilter, ImageAnalyzer};
use crate::persistence::{
    Backend, ImageId, ImageRecord, ImageRepository, NewImage, PersistenceError, Repositories,
};
use crate::policy::ContentPolicy;
use crate::reporter::ErrorReporter;
use crate::storage::{ObjectStore, StorageError};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub const MODERATION_WARNING: &str =
    "Image uploaded, but it was flagged by content moderation and may be hidden.";

/// Failures that end a request
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Backend '{0}' is not configured")]
    BackendNotConfigured(Backend),

    #[error("Image {0} not found")]
    NotFound(ImageId),

    #[error("Object storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// An uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Result of a successful add-image request
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AddImageOutcome {
    pub id: ImageId,
    pub name: String,
    pub url: String,
    pub ai_labels: Vec<String>,
    pub ai_text: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation_warning: Option<String>,
    /// Degraded steps that did not stop the request
    pub warnings: Vec<String>,
}

/// Result of a delete request
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeleteOutcome {
    pub id: ImageId,
    pub name: String,
    pub deleted_count: u64,
    pub storage_deleted: bool,
}

/// Sequences storage, analysis, policy and persistence for each request
#[derive(Clone)]
pub struct ImageService {
    store: Arc<dyn ObjectStore>,
    analyzer: Arc<dyn ImageAnalyzer>,
    filter: DetectionFilter,
    policy: ContentPolicy,
    repositories: Repositories,
    reporter: Arc<dyn ErrorReporter>,
}

impl ImageService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        analyzer: Arc<dyn ImageAnalyzer>,
        filter: DetectionFilter,
        policy: ContentPolicy,
        repositories: Repositories,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            store,
            analyzer,
            filter,
            policy,
            repositories,
            reporter,
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    fn repository(&self, backend: Backend) -> Result<&Arc<dyn ImageRepository>, ServiceError> {
        self.repositories
            .get(backend)
            .ok_or(ServiceError::BackendNotConfigured(backend))
    }

    #[instrument(skip(self))]
    pub async fn list_images(&self, backend: Backend) -> Result<Vec<ImageRecord>, ServiceError> {
        let repository = self.repository(backend)?;
        repository.list_all().await.map_err(|e| {
            self.reporter.report_error("list_images", &e);
            e.into()
        })
    }

    #[instrument(skip(self, id), fields(id = %id))]
    pub async fn get_image(&self, backend: Backend, id: &ImageId) -> Result<ImageRecord, ServiceError> {
        let repository = self.repository(backend)?;
        match repository.get_by_id(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(ServiceError::NotFound(id.clone())),
            Err(e) => {
                self.reporter.report_error("get_image", &e);
                Err(e.into())
            }
        }
    }

    /// upload -> analyze -> policy -> insert
    ///
    /// Upload and insert failures end the request; analysis failures and
    /// policy hits only add warnings.
    #[instrument(skip(self, upload), fields(name = %upload.name, size_bytes = upload.body.len()))]
    pub async fn add_image(
        &self,
        backend: Backend,
        upload: Upload,
    ) -> Result<AddImageOutcome, ServiceError> {
        let repository = self.repository(backend)?;
        let mut warnings = Vec::new();

        let url = self
            .store
            .upload(&upload.name, upload.body, &upload.content_type)
            .await
            .map_err(|e| {
                self.reporter.report_error("upload", &e);
                ServiceError::from(e)
            })?;

        let report = analyze(self.analyzer.as_ref(), &self.filter, &upload.name).await;
        for failure in &report.failures {
            self.reporter.report_error("detect", failure);
            warnings.push(failure.to_string());
        }
        if report.is_total_failure() {
            let failure = AnalysisError::Unavailable {
                key: upload.name.clone(),
            };
            self.reporter.report_error("detect", &failure);
            warnings.push(failure.to_string());
        }
        let analysis = report.analysis;

        let verdict = self.policy.evaluate(&analysis);
        let moderation_warning = verdict.moderation_flagged.then(|| {
            metrics::counter!("images.moderation_flagged").increment(1);
            warn!(flags = ?analysis.moderation_flags, "Upload flagged by moderation");
            MODERATION_WARNING.to_string()
        });
        if verdict.error_text {
            self.reporter.report_message(
                "policy",
                &format!("Detected error text in {}: {:?}", upload.name, analysis.text_lines),
            );
        }
        if verdict.bug_label {
            self.reporter.report_message(
                "policy",
                &format!("Detected bug label in {}: {:?}", upload.name, analysis.labels),
            );
        }

        let new_image = NewImage {
            name: upload.name.clone(),
            url: url.clone(),
            ai_labels: analysis.labels,
            ai_text: analysis.text_lines,
        };

        let id = match repository.insert(new_image.clone()).await {
            Ok(id) => id,
            Err(e) => {
                self.reporter.report_error("insert", &e);
                self.reporter.report_message(
                    "insert",
                    &format!("Stored object {} has no database record", upload.name),
                );
                return Err(e.into());
            }
        };

        info!(id = %id, backend = %backend, "Image added");

        Ok(AddImageOutcome {
            id,
            name: new_image.name,
            url,
            ai_labels: new_image.ai_labels,
            ai_text: new_image.ai_text,
            moderation_warning,
            warnings,
        })
    }

    /// lookup -> delete row -> delete stored object
    ///
    /// A missing record skips the remaining steps; a storage failure after the
    /// row is gone is reported and reflected in `storage_deleted`.
    #[instrument(skip(self, id), fields(id = %id))]
    pub async fn delete_image(
        &self,
        backend: Backend,
        id: &ImageId,
    ) -> Result<DeleteOutcome, ServiceError> {
        let repository = self.repository(backend)?;

        let record = match repository.get_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ServiceError::NotFound(id.clone())),
            Err(e) => {
                self.reporter.report_error("delete_lookup", &e);
                return Err(e.into());
            }
        };

        let deleted_count = repository.delete_by_id(id).await.map_err(|e| {
            self.reporter.report_error("delete_record", &e);
            ServiceError::from(e)
        })?;

        let storage_deleted = match self.store.delete(&record.name).await {
            Ok(()) => true,
            Err(e) => {
                self.reporter.report_error("delete_object", &e);
                false
            }
        };

        metrics::counter!("images.deleted", "backend" => backend.as_str()).increment(1);
        info!(name = %record.name, deleted_count, storage_deleted, "Image deleted");

        Ok(DeleteOutcome {
            id: record.id,
            name: record.name,
            deleted_count,
            storage_deleted,
        })
    }

    /// Administrative bucket reset; database rows are left untouched
    #[instrument(skip(self))]
    pub async fn delete_all_objects(&self) -> Result<usize, ServiceError> {
        self.store.delete_all().await.map_err(|e| {
            self.reporter.report_error("delete_all_objects", &e);
            e.into()
        })
    }
}
