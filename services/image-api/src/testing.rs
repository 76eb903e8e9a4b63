//! In-memory adapters for orchestrator and router tests.

use crate::analysis::{
    AnalysisError, DetectedLabel, DetectedText, DetectionFilter, ImageAnalyzer, ModerationFlag,
};
use crate::persistence::{
    Backend, ImageId, ImageRecord, ImageRepository, NewImage, PersistenceError, Repositories,
};
use crate::policy::ContentPolicy;
use crate::reporter::ErrorReporter;
use crate::service::{ImageService, Upload};
use crate::storage::{public_object_url, ObjectStore, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

pub fn upload(name: &str) -> Upload {
    Upload {
        name: name.to_string(),
        content_type: "image/jpeg".to_string(),
        body: Bytes::from_static(b"\xff\xd8\xff\xe0fake-jpeg"),
    }
}

/// Service wired to fresh in-memory adapters, with Mongo as the only backend
pub fn memory_service(
    analyzer: StaticAnalyzer,
) -> (
    ImageService,
    Arc<MemoryObjectStore>,
    Arc<MemoryRepository>,
    Arc<RecordingReporter>,
) {
    let store = Arc::new(MemoryObjectStore::new("gallery"));
    let repo = Arc::new(MemoryRepository::default());
    let reporter = Arc::new(RecordingReporter::default());

    let service = ImageService::new(
        store.clone(),
        Arc::new(analyzer),
        DetectionFilter::default(),
        ContentPolicy::default(),
        Repositories::new().with(Backend::Mongo, repo.clone()),
        reporter.clone(),
    );

    (service, store, repo, reporter)
}

pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize, StorageError> {
        let mut objects = self.objects.lock().unwrap();
        let count = objects.len();
        objects.clear();
        Ok(count)
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(&self.bucket, "s3.amazonaws.com", key)
    }
}

/// Sequential integer ids, listed newest first
#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<Vec<ImageRecord>>,
    next_id: Mutex<u64>,
}

impl MemoryRepository {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageRepository for MemoryRepository {
    async fn list_all(&self) -> Result<Vec<ImageRecord>, PersistenceError> {
        Ok(self.rows.lock().unwrap().iter().rev().cloned().collect())
    }

    async fn get_by_id(&self, id: &ImageId) -> Result<Option<ImageRecord>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.id == id)
            .cloned())
    }

    async fn insert(&self, image: NewImage) -> Result<ImageId, PersistenceError> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = ImageId::new(next_id.to_string());

        self.rows.lock().unwrap().push(ImageRecord {
            id: id.clone(),
            name: image.name,
            url: image.url,
            width: None,
            height: None,
            url_resize: None,
            date_added: None,
            date_identified: None,
            ai_labels: image.ai_labels,
            ai_text: image.ai_text,
        });

        Ok(id)
    }

    async fn delete_by_id(&self, id: &ImageId) -> Result<u64, PersistenceError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| &r.id != id);
        Ok((before - rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Returns fixed detections, or fails every call
#[derive(Default)]
pub struct StaticAnalyzer {
    labels: Vec<DetectedLabel>,
    text: Vec<DetectedText>,
    moderation: Vec<ModerationFlag>,
    fail: bool,
}

impl StaticAnalyzer {
    pub fn labels(labels: Vec<DetectedLabel>) -> Self {
        Self {
            labels,
            ..Default::default()
        }
    }

    pub fn moderation(names: Vec<&str>) -> Self {
        Self {
            moderation: names
                .into_iter()
                .map(|name| ModerationFlag {
                    name: name.to_string(),
                    confidence: 90.0,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn check(&self, operation: &'static str) -> Result<(), AnalysisError> {
        if self.fail {
            return Err(AnalysisError::Service {
                operation,
                message: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImageAnalyzer for StaticAnalyzer {
    async fn detect_labels(&self, _key: &str) -> Result<Vec<DetectedLabel>, AnalysisError> {
        self.check("DetectLabels")?;
        Ok(self.labels.clone())
    }

    async fn detect_text(&self, _key: &str) -> Result<Vec<DetectedText>, AnalysisError> {
        self.check("DetectText")?;
        Ok(self.text.clone())
    }

    async fn detect_moderation(&self, _key: &str) -> Result<Vec<ModerationFlag>, AnalysisError> {
        self.check("DetectModerationLabels")?;
        Ok(self.moderation.clone())
    }
}

/// Captures everything sent to the sink
#[derive(Default)]
pub struct RecordingReporter {
    errors: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report_error(&self, operation: &str, error: &(dyn Error + 'static)) {
        self.errors
            .lock()
            .unwrap()
            .push(format!("{operation}: {error}"));
    }

    fn report_message(&self, _operation: &str, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
