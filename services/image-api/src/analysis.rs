use crate::config::AnalysisConfig;
use async_trait::async_trait;
use aws_sdk_rekognition::error::DisplayErrorContext;
use aws_sdk_rekognition::types::{Image, S3Object, TextTypes};
use aws_sdk_rekognition::Client as RekognitionClient;
use aws_types::SdkConfig;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors returned by the detection service
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },

    #[error("All detection calls failed for {key}")]
    Unavailable { key: String },
}

/// A label with its confidence (0-100)
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f32,
}

/// Granularity of a text detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextGranularity {
    Line,
    Word,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedText {
    pub text: String,
    pub granularity: TextGranularity,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationFlag {
    pub name: String,
    pub confidence: f32,
}

/// Label/text/moderation detection for an object already in the bucket
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn detect_labels(&self, key: &str) -> Result<Vec<DetectedLabel>, AnalysisError>;

    async fn detect_text(&self, key: &str) -> Result<Vec<DetectedText>, AnalysisError>;

    async fn detect_moderation(&self, key: &str) -> Result<Vec<ModerationFlag>, AnalysisError>;
}

/// Filtered detection results for one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub labels: Vec<String>,
    pub text_lines: Vec<String>,
    pub moderation_flags: Vec<String>,
}

/// Outcome of running all three detections
#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub analysis: Analysis,
    /// Calls that failed; their lists are left empty
    pub failures: Vec<AnalysisError>,
}

impl AnalysisReport {
    /// True when every detection call failed. Successful calls that found
    /// nothing above threshold are a valid, empty analysis.
    pub fn is_total_failure(&self) -> bool {
        self.failures.len() == 3
    }
}

/// Applies thresholds and label normalization to raw detections
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    label_min_confidence: f32,
    text_min_confidence: f32,
    moderation_min_confidence: f32,
}

impl DetectionFilter {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            label_min_confidence: config.label_min_confidence,
            text_min_confidence: config.text_min_confidence,
            moderation_min_confidence: config.moderation_min_confidence,
        }
    }

    /// Labels above threshold, with "Insect" rewritten to "Bug"
    pub fn labels(&self, labels: Vec<DetectedLabel>) -> Vec<String> {
        labels
            .into_iter()
            .filter(|l| l.confidence > self.label_min_confidence)
            .map(|l| l.name.replace("Insect", "Bug"))
            .collect()
    }

    /// Whole lines above threshold; word detections are dropped
    pub fn text_lines(&self, detections: Vec<DetectedText>) -> Vec<String> {
        detections
            .into_iter()
            .filter(|t| t.granularity == TextGranularity::Line)
            .filter(|t| t.confidence > self.text_min_confidence)
            .map(|t| t.text)
            .collect()
    }

    pub fn moderation_flags(&self, flags: Vec<ModerationFlag>) -> Vec<String> {
        flags
            .into_iter()
            .filter(|f| f.confidence > self.moderation_min_confidence)
            .map(|f| f.name)
            .collect()
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

/// Run the three detections concurrently; each failure only empties its own list
#[instrument(skip(analyzer, filter))]
pub async fn analyze(
    analyzer: &dyn ImageAnalyzer,
    filter: &DetectionFilter,
    key: &str,
) -> AnalysisReport {
    let (labels, text, moderation) = tokio::join!(
        analyzer.detect_labels(key),
        analyzer.detect_text(key),
        analyzer.detect_moderation(key),
    );

    let mut report = AnalysisReport::default();

    match labels {
        Ok(labels) => report.analysis.labels = filter.labels(labels),
        Err(e) => report.failures.push(e),
    }
    match text {
        Ok(text) => report.analysis.text_lines = filter.text_lines(text),
        Err(e) => report.failures.push(e),
    }
    match moderation {
        Ok(flags) => report.analysis.moderation_flags = filter.moderation_flags(flags),
        Err(e) => report.failures.push(e),
    }

    if !report.failures.is_empty() {
        warn!(failed_calls = report.failures.len(), key = %key, "Detection degraded");
    }

    debug!(
        labels = ?report.analysis.labels,
        text_lines = ?report.analysis.text_lines,
        moderation_flags = ?report.analysis.moderation_flags,
        "Detection finished"
    );

    report
}

/// Amazon Rekognition analyzer reading images straight from the bucket
pub struct RekognitionAnalyzer {
    client: RekognitionClient,
    bucket: String,
}

impl RekognitionAnalyzer {
    pub fn new(sdk_config: &SdkConfig, bucket: &str) -> Self {
        info!(bucket = %bucket, "Rekognition analyzer initialized");

        Self {
            client: RekognitionClient::new(sdk_config),
            bucket: bucket.to_string(),
        }
    }

    fn image(&self, key: &str) -> Image {
        Image::builder()
            .s3_object(S3Object::builder().bucket(&self.bucket).name(key).build())
            .build()
    }
}

#[async_trait]
impl ImageAnalyzer for RekognitionAnalyzer {
    async fn detect_labels(&self, key: &str) -> Result<Vec<DetectedLabel>, AnalysisError> {
        let response = self
            .client
            .detect_labels()
            .image(self.image(key))
            .send()
            .await
            .map_err(|e| AnalysisError::Service {
                operation: "DetectLabels",
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(response
            .labels()
            .iter()
            .filter_map(|label| {
                Some(DetectedLabel {
                    name: label.name()?.to_string(),
                    confidence: label.confidence().unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn detect_text(&self, key: &str) -> Result<Vec<DetectedText>, AnalysisError> {
        let response = self
            .client
            .detect_text()
            .image(self.image(key))
            .send()
            .await
            .map_err(|e| AnalysisError::Service {
                operation: "DetectText",
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(response
            .text_detections()
            .iter()
            .filter_map(|detection| {
                let granularity = match detection.r#type()? {
                    TextTypes::Line => TextGranularity::Line,
                    _ => TextGranularity::Word,
                };
                Some(DetectedText {
                    text: detection.detected_text()?.to_string(),
                    granularity,
                    confidence: detection.confidence().unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn detect_moderation(&self, key: &str) -> Result<Vec<ModerationFlag>, AnalysisError> {
        let response = self
            .client
            .detect_moderation_labels()
            .image(self.image(key))
            .send()
            .await
            .map_err(|e| AnalysisError::Service {
                operation: "DetectModerationLabels",
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(response
            .moderation_labels()
            .iter()
            .filter_map(|label| {
                Some(ModerationFlag {
                    name: label.name()?.to_string(),
                    confidence: label.confidence().unwrap_or_default(),
                })
            })
            .collect())
    }
}
