//! Wire types for the detection and training backend.
//!
//! Snapshots are plain values; the store replaces them wholesale.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Free-form JSON object whose schema the backend owns.
pub type OpaqueMap = serde_json::Map<String, Value>;

/// Last reported state of the backend training job.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrainingStatus {
    pub is_training: bool,
    pub current_epoch: u32,
    pub total_epochs: u32,
    pub status_message: String,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
}

#[derive(Deserialize)]
struct TrainingStatusWire {
    #[serde(default)]
    is_training: bool,
    #[serde(default)]
    current_epoch: Option<u32>,
    #[serde(default)]
    total_epochs: Option<u32>,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    progress: Option<Value>,
}

impl<'de> Deserialize<'de> for TrainingStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = TrainingStatusWire::deserialize(deserializer)?;
        // Older backend builds report progress as a sentence instead of a fraction.
        let (progress, progress_text) = match wire.progress {
            Some(Value::Number(number)) => (number.as_f64().unwrap_or(0.0), None),
            Some(Value::String(text)) => (0.0, Some(text)),
            _ => (0.0, None),
        };
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Ok(Self {
            is_training: wire.is_training,
            current_epoch: wire.current_epoch.unwrap_or(0),
            total_epochs: wire.total_epochs.unwrap_or(0),
            status_message: wire.status_message.or(progress_text).unwrap_or_default(),
            progress,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalMetrics {
    #[serde(default)]
    pub train_loss: f64,
    #[serde(default)]
    pub val_loss: f64,
    #[serde(default)]
    pub map50: f64,
    #[serde(default)]
    pub map50_95: f64,
}

/// One completed or in-progress training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistoryEntry {
    pub run_name: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub epochs: u32,
    #[serde(default)]
    pub best_model_path: Option<String>,
    #[serde(default)]
    pub last_model_path: Option<String>,
    #[serde(default)]
    pub final_metrics: FinalMetrics,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub args: OpaqueMap,
    #[serde(default)]
    pub results_path: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct HistoryEnvelope {
    #[serde(default)]
    pub history: Vec<TrainingHistoryEntry>,
}

/// A trained model artifact that can be loaded for detection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub run_name: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub best_model: Option<String>,
    #[serde(default)]
    pub last_model: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub args: OpaqueMap,
}

impl ModelInfo {
    /// Path to load for this run, preferring the best checkpoint.
    pub fn preferred_path(&self) -> Option<&str> {
        self.best_model.as_deref().or(self.last_model.as_deref())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ModelsEnvelope {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl<'de> Deserialize<'de> for ImageSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Object { width: u32, height: u32 },
            Pair(u32, u32),
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Object { width, height } | Wire::Pair(width, height) => Self { width, height },
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationStats {
    #[serde(default, alias = "avg")]
    pub avg_bbox_area: f64,
    #[serde(default, alias = "min")]
    pub min_bbox_area: f64,
    #[serde(default, alias = "max")]
    pub max_bbox_area: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetAnalysis {
    #[serde(default)]
    pub total_images: u64,
    #[serde(default)]
    pub total_annotations: u64,
    #[serde(default)]
    pub class_distribution: BTreeMap<String, u64>,
    #[serde(default)]
    pub image_sizes: Vec<ImageSize>,
    #[serde(default)]
    pub annotation_stats: AnnotationStats,
    /// Serialized chart definition; kept opaque.
    #[serde(default)]
    pub class_distribution_plot: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct AnalysisEnvelope {
    #[serde(default)]
    pub analysis: DatasetAnalysis,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    /// `[x1, y1, x2, y2]` in source-image pixels.
    pub bbox: [f64; 4],
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub message: String,
    /// Base64 image with boxes drawn by the backend, when provided.
    #[serde(default)]
    pub processed_image: Option<String>,
}

impl DetectionResult {
    /// Decode the annotated image, `Ok(None)` when the backend sent none.
    pub fn annotated_image(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        let Some(encoded) = self.processed_image.as_deref() else {
            return Ok(None);
        };
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Ok(None);
        }
        // Tolerate data URLs.
        let payload = match encoded.split_once(";base64,") {
            Some((_, data)) => data,
            None => encoded,
        };
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map(Some)
    }
}

/// One box in the labeling submission wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub label: String,
}

/// Body of the `labeling_data` form field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelingData {
    pub boxes: Vec<SubmissionBox>,
    pub image_width: u32,
    pub image_height: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelingReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub saved_path: String,
    #[serde(default)]
    pub total_labels: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub backup_path: Option<String>,
}

/// Per-epoch series for one run plus rendered chart definitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// `None` while the run has not produced a results file yet.
    #[serde(default)]
    pub metrics: Option<BTreeMap<String, Vec<f64>>>,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub plots: OpaqueMap,
}

impl TrainingMetrics {
    pub fn is_available(&self) -> bool {
        self.metrics.as_ref().is_some_and(|series| !series.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingDataStats {
    #[serde(default)]
    pub total_images: u64,
    #[serde(default)]
    pub total_labels: u64,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub class_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub data_directory: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    #[serde(default)]
    pub map50: f64,
    #[serde(default)]
    pub map50_95: f64,
    #[serde(default)]
    pub precision: f64,
    #[serde(default)]
    pub recall: f64,
    #[serde(flatten)]
    pub extra: OpaqueMap,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    #[serde(default)]
    pub models: Vec<OpaqueMap>,
    #[serde(default)]
    pub comparison_plot: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassList {
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub message: String,
}

/// Final-epoch metrics parsed from a run's results file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    #[serde(default)]
    pub final_epoch: u32,
    #[serde(default)]
    pub final_precision: f64,
    #[serde(default)]
    pub final_recall: f64,
    #[serde(default)]
    pub final_map50: f64,
    #[serde(default)]
    pub final_map50_95: f64,
    #[serde(default)]
    pub total_epochs: u32,
    /// Seconds.
    #[serde(default)]
    pub training_time: f64,
}

/// One run directory as summarized by the results endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub name: String,
    #[serde(default)]
    pub path: String,
    /// Unix seconds.
    #[serde(default)]
    pub modified: f64,
    #[serde(default)]
    pub modified_date: String,
    #[serde(default)]
    pub has_weights: bool,
    #[serde(default)]
    pub has_results: bool,
    #[serde(default)]
    pub has_plots: bool,
    /// `None` until the run has written a parseable results file.
    #[serde(default)]
    pub metrics: Option<RunMetrics>,
    /// Megabytes.
    #[serde(default)]
    pub best_model_size: f64,
    #[serde(default)]
    pub last_model_size: f64,
    #[serde(default)]
    pub plot_files: Vec<String>,
    /// Values are numbers or `"Unknown"`, so they stay untyped.
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub training_args: OpaqueMap,
}

/// Run directories on the backend, most recently modified first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingResults {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub training_runs: Vec<TrainingRun>,
    #[serde(default)]
    pub latest_run: Option<TrainingRun>,
}

impl TrainingResults {
    /// The newest run, falling back to the head of the list when the backend
    /// omits `latest_run`.
    pub fn latest(&self) -> Option<&TrainingRun> {
        self.latest_run.as_ref().or(self.training_runs.first())
    }
}

/// Archive formats accepted by the export endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Zip,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
        }
    }

    pub fn file_extension(self) -> &'static str {
        self.as_str()
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            other => Err(format!("Unsupported export format '{other}'")),
        }
    }
}

fn null_as_empty_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OpaqueMap, D::Error> {
    Ok(Option::<OpaqueMap>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_status_decodes_full_shape() {
        let status: TrainingStatus = serde_json::from_str(
            r#"{"is_training":true,"current_epoch":3,"total_epochs":10,"status_message":"Epoch 3/10","progress":0.3}"#,
        )
        .unwrap();
        assert!(status.is_training);
        assert_eq!(status.current_epoch, 3);
        assert_eq!(status.total_epochs, 10);
        assert_eq!(status.status_message, "Epoch 3/10");
        assert!((status.progress - 0.3).abs() < 1e-9);
    }

    #[test]
    fn training_status_tolerates_text_progress_and_missing_fields() {
        let status: TrainingStatus = serde_json::from_str(
            r#"{"is_training":false,"current_run":null,"progress":"Not started"}"#,
        )
        .unwrap();
        assert!(!status.is_training);
        assert_eq!(status.status_message, "Not started");
        assert_eq!(status.progress, 0.0);
        assert_eq!(status.total_epochs, 0);
    }

    #[test]
    fn training_status_clamps_progress() {
        let status: TrainingStatus =
            serde_json::from_str(r#"{"is_training":true,"progress":1.7}"#).unwrap();
        assert_eq!(status.progress, 1.0);
        let status: TrainingStatus =
            serde_json::from_str(r#"{"is_training":true,"progress":-0.2}"#).unwrap();
        assert_eq!(status.progress, 0.0);
    }

    #[test]
    fn history_entry_accepts_null_args_and_missing_paths() {
        let envelope: HistoryEnvelope = serde_json::from_str(
            r#"{"history":[{"run_name":"train3","timestamp":"2024-05-01T10:00:00","epochs":50,
                "final_metrics":{"map50":0.8,"map50_95":0.6},"args":null}]}"#,
        )
        .unwrap();
        let entry = &envelope.history[0];
        assert_eq!(entry.run_name, "train3");
        assert!(entry.args.is_empty());
        assert!(entry.best_model_path.is_none());
        assert_eq!(entry.final_metrics.train_loss, 0.0);
        assert_eq!(entry.final_metrics.map50, 0.8);
    }

    #[test]
    fn image_sizes_accept_objects_and_pairs() {
        let analysis: DatasetAnalysis = serde_json::from_str(
            r#"{"total_images":2,"image_sizes":[{"width":640,"height":480},[800,600]]}"#,
        )
        .unwrap();
        assert_eq!(
            analysis.image_sizes,
            vec![
                ImageSize { width: 640, height: 480 },
                ImageSize { width: 800, height: 600 }
            ]
        );
    }

    #[test]
    fn detection_uses_class_key() {
        let result: DetectionResult = serde_json::from_str(
            r#"{"detections":[{"class":"cup","confidence":0.91,"bbox":[1,2,3,4]}],"message":"Found 1"}"#,
        )
        .unwrap();
        assert_eq!(result.detections[0].class_name, "cup");
        assert_eq!(result.detections[0].bbox, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(result.annotated_image().unwrap(), None);
    }

    #[test]
    fn annotated_image_decodes_plain_and_data_url_base64() {
        let mut result = DetectionResult {
            processed_image: Some("aGVsbG8=".into()),
            ..DetectionResult::default()
        };
        assert_eq!(result.annotated_image().unwrap(), Some(b"hello".to_vec()));
        result.processed_image = Some("data:image/jpeg;base64,aGVsbG8=".into());
        assert_eq!(result.annotated_image().unwrap(), Some(b"hello".to_vec()));
        result.processed_image = Some(String::new());
        assert_eq!(result.annotated_image().unwrap(), None);
    }

    #[test]
    fn metrics_null_means_not_available() {
        let metrics: TrainingMetrics =
            serde_json::from_str(r#"{"metrics":null,"plots":{}}"#).unwrap();
        assert!(!metrics.is_available());
        let metrics: TrainingMetrics = serde_json::from_str(
            r#"{"metrics":{"epochs":[1,2],"map50":[0.1,0.2]},"plots":{"loss":{"data":[]}}}"#,
        )
        .unwrap();
        assert!(metrics.is_available());
        assert!(metrics.plots.contains_key("loss"));
    }

    #[test]
    fn validation_metrics_keep_unknown_fields() {
        let metrics: ValidationMetrics = serde_json::from_str(
            r#"{"map50":0.85,"map50_95":0.65,"precision":0.9,"recall":0.8,"fitness":0.7}"#,
        )
        .unwrap();
        assert_eq!(metrics.map50, 0.85);
        assert_eq!(metrics.extra.get("fitness"), Some(&serde_json::json!(0.7)));
    }

    #[test]
    fn training_results_tolerate_missing_latest_and_partial_runs() {
        let results: TrainingResults = serde_json::from_str(
            r#"{
                "message": "Found 2 training runs",
                "training_runs": [
                    {"name": "train3", "path": "runs/detect/train3", "modified": 1704103200.5,
                     "modified_date": "2024-01-01 10:00:00", "has_weights": true, "has_results": true,
                     "has_plots": true, "best_model_size": 6.2, "last_model_size": 6.2,
                     "plot_files": ["results.png"],
                     "metrics": {"final_epoch": 9, "final_precision": 0.9, "final_recall": 0.8,
                                 "final_map50": 0.85, "final_map50_95": 0.6, "total_epochs": 10,
                                 "training_time": 412.0},
                     "training_args": {"epochs": 10, "batch_size": "Unknown"}},
                    {"name": "train2", "metrics": null, "training_args": null}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(results.training_runs.len(), 2);
        let latest = results.latest().unwrap();
        assert_eq!(latest.name, "train3");
        assert_eq!(latest.metrics.as_ref().unwrap().final_map50, 0.85);
        assert_eq!(
            latest.training_args.get("batch_size"),
            Some(&serde_json::json!("Unknown"))
        );
        assert!(results.training_runs[1].metrics.is_none());
        assert!(results.training_runs[1].training_args.is_empty());

        let empty: TrainingResults =
            serde_json::from_str(r#"{"message":"No training runs found","training_runs":[]}"#)
                .unwrap();
        assert!(empty.latest().is_none());
    }

    #[test]
    fn model_prefers_best_checkpoint() {
        let model = ModelInfo {
            run_name: "train2".into(),
            best_model: Some("runs/detect/train2/weights/best.pt".into()),
            last_model: Some("runs/detect/train2/weights/last.pt".into()),
            ..ModelInfo::default()
        };
        assert_eq!(model.preferred_path(), Some("runs/detect/train2/weights/best.pt"));
    }
}
