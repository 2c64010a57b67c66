use std::io::Write;

use serde_json::json;

use super::ApiClient;
use super::error::ApiError;
use super::multipart::{ImagePayload, MultipartForm};
use super::transport::Method;
use super::types::{
    AnalysisEnvelope, BackupReceipt, ClassList, DatasetAnalysis, DetectionResult, ExportFormat,
    HistoryEnvelope, LabelingData, LabelingReceipt, MessageResponse, ModelComparison, ModelInfo,
    ModelsEnvelope, OpaqueMap, TrainingDataStats, TrainingHistoryEntry, TrainingMetrics,
    TrainingResults, TrainingStatus, ValidationMetrics,
};
use super::validation;
use crate::config::EpochsEncoding;

const IMAGE_FIELD: &str = "image";

/// How the training job is started on the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrainingMode {
    /// `/training/start`: the call returns once the backend has queued the job.
    Sync,
    /// `/training/start-async`: returns immediately; the job runs server-side.
    #[default]
    Async,
}

impl TrainingMode {
    fn path(self) -> [&'static str; 2] {
        match self {
            Self::Sync => ["training", "start"],
            Self::Async => ["training", "start-async"],
        }
    }
}

impl ApiClient {
    pub fn detect(&self, image: &ImagePayload) -> Result<DetectionResult, ApiError> {
        let form = MultipartForm::new().image(IMAGE_FIELD, image);
        self.transport.send_multipart(&["detect"], &form)
    }

    pub fn detect_with_confidence(
        &self,
        image: &ImagePayload,
        confidence: f64,
    ) -> Result<DetectionResult, ApiError> {
        let confidence = validation::validate_confidence(confidence)?;
        let form = MultipartForm::new()
            .image(IMAGE_FIELD, image)
            .text("confidence", confidence.to_string());
        self.transport
            .send_multipart(&["detect", "with-confidence"], &form)
    }

    /// Upload an image with its boxes; coordinates must be absolute pixels of
    /// an image of exactly `image_width` x `image_height`.
    pub fn submit_labeling_data(
        &self,
        image: &ImagePayload,
        data: &LabelingData,
    ) -> Result<LabelingReceipt, ApiError> {
        if data.image_width == 0 || data.image_height == 0 {
            return Err(ApiError::Validation(
                "Image dimensions must be non-zero".into(),
            ));
        }
        let encoded = serde_json::to_string(data)
            .map_err(|err| ApiError::Validation(format!("Unserializable labeling data: {err}")))?;
        let form = MultipartForm::new()
            .image(IMAGE_FIELD, image)
            .text("labeling_data", encoded);
        self.transport.send_multipart(&["labeling", "submit"], &form)
    }

    /// Start a fine-tuning job. Out-of-range epochs never reach the network.
    pub fn start_training(
        &self,
        epochs: i64,
        mode: TrainingMode,
    ) -> Result<MessageResponse, ApiError> {
        let epochs = validation::validate_epochs(epochs)?;
        let path = mode.path();
        tracing::info!("Starting training ({mode:?}) for {epochs} epochs");
        match self.epochs_encoding {
            EpochsEncoding::Query => {
                self.transport
                    .call_json(Method::Post, &path, &[("epochs", epochs.to_string())])
            }
            EpochsEncoding::JsonBody => {
                self.transport
                    .send_json(Method::Post, &path, &[], &json!({ "epochs": epochs }))
            }
        }
    }

    pub fn training_status(&self) -> Result<TrainingStatus, ApiError> {
        self.transport
            .call_json(Method::Get, &["training", "status"], &[])
    }

    /// Training runs, newest first as reported by the backend.
    pub fn training_history(&self) -> Result<Vec<TrainingHistoryEntry>, ApiError> {
        let envelope: HistoryEnvelope =
            self.transport
                .call_json(Method::Get, &["training", "history"], &[])?;
        Ok(envelope.history)
    }

    pub fn training_metrics(&self, run_name: &str) -> Result<TrainingMetrics, ApiError> {
        validation::validate_run_name(run_name)?;
        self.transport
            .call_json(Method::Get, &["training", "metrics", run_name], &[])
    }

    /// Run directories with their final metrics and training arguments.
    pub fn training_results(&self) -> Result<TrainingResults, ApiError> {
        self.transport
            .call_json(Method::Get, &["training", "results"], &[])
    }

    pub fn training_plot(&self, run_name: &str, plot_name: &str) -> Result<Vec<u8>, ApiError> {
        validation::validate_run_name(run_name)?;
        validation::validate_plot_name(plot_name)?;
        self.transport
            .get_bytes(&["training", "results", run_name, "plots", plot_name], &[])
    }

    pub fn training_data_stats(&self) -> Result<TrainingDataStats, ApiError> {
        self.transport
            .call_json(Method::Get, &["training", "data", "stats"], &[])
    }

    pub fn dataset_analysis(&self) -> Result<DatasetAnalysis, ApiError> {
        let envelope: AnalysisEnvelope =
            self.transport
                .call_json(Method::Get, &["data", "analysis"], &[])?;
        Ok(envelope.analysis)
    }

    pub fn available_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        let envelope: ModelsEnvelope =
            self.transport
                .call_json(Method::Get, &["models", "available"], &[])?;
        Ok(envelope.models)
    }

    /// Load a trained checkpoint; later detections use it.
    pub fn load_model(&self, model_path: &str) -> Result<MessageResponse, ApiError> {
        if model_path.trim().is_empty() {
            return Err(ApiError::Validation("Model path must not be empty".into()));
        }
        self.transport.send_json(
            Method::Post,
            &["models", "load"],
            &[],
            &json!({ "model_path": model_path }),
        )
    }

    /// Reload the current checkpoint, or switch to `model_path` when given.
    pub fn reload_model(&self, model_path: Option<&str>) -> Result<MessageResponse, ApiError> {
        let query: Vec<(&str, String)> = model_path
            .map(|path| vec![("model_path", path.to_string())])
            .unwrap_or_default();
        self.transport
            .call_json(Method::Post, &["model", "reload"], &query)
    }

    pub fn backup_model(&self) -> Result<BackupReceipt, ApiError> {
        self.transport
            .call_json(Method::Post, &["models", "backup"], &[])
    }

    pub fn validate_model(&self, test_data_path: Option<&str>) -> Result<ValidationMetrics, ApiError> {
        let query: Vec<(&str, String)> = test_data_path
            .map(|path| vec![("test_data_path", path.to_string())])
            .unwrap_or_default();
        self.transport
            .call_json(Method::Get, &["models", "validate"], &query)
    }

    pub fn model_comparison(&self) -> Result<ModelComparison, ApiError> {
        self.transport
            .call_json(Method::Get, &["models", "comparison"], &[])
    }

    /// Export the collected training data as an archive held in memory.
    pub fn export_training_data(&self, format: ExportFormat) -> Result<Vec<u8>, ApiError> {
        self.transport
            .get_bytes(&["data", "export"], &[("format", format.as_str().to_string())])
    }

    /// Export the collected training data straight into `writer`.
    pub fn export_training_data_to(
        &self,
        format: ExportFormat,
        writer: &mut impl Write,
    ) -> Result<u64, ApiError> {
        self.transport.download(
            &["data", "export"],
            &[("format", format.as_str().to_string())],
            writer,
        )
    }

    /// Delete all but the `keep_latest` most recent runs on the backend.
    pub fn cleanup_training_runs(&self, keep_latest: u32) -> Result<MessageResponse, ApiError> {
        self.transport.call_json(
            Method::Delete,
            &["training", "cleanup"],
            &[("keep_latest", keep_latest.to_string())],
        )
    }

    pub fn classes(&self) -> Result<ClassList, ApiError> {
        self.transport
            .call_json(Method::Get, &["model", "classes"], &[])
    }

    pub fn add_classes(&self, classes: &[String]) -> Result<ClassList, ApiError> {
        let classes = validation::normalize_classes(classes)?;
        self.transport.send_json(
            Method::Post,
            &["model", "classes"],
            &[],
            &json!({ "classes": classes }),
        )
    }

    pub fn clear_classes(&self) -> Result<MessageResponse, ApiError> {
        self.transport
            .call_json(Method::Delete, &["model", "classes"], &[])
    }

    pub fn model_info(&self) -> Result<OpaqueMap, ApiError> {
        self.transport.call_json(Method::Get, &["model", "info"], &[])
    }

    /// Loaded model summary stamped with the backend's clock.
    pub fn model_status(&self) -> Result<OpaqueMap, ApiError> {
        self.transport
            .call_json(Method::Get, &["model", "status"], &[])
    }

    /// Service name, version and endpoint listing from the API root.
    pub fn api_info(&self) -> Result<OpaqueMap, ApiError> {
        self.transport.call_json(Method::Get, &[], &[])
    }

    pub fn monitor_status(&self) -> Result<OpaqueMap, ApiError> {
        self.transport
            .call_json(Method::Get, &["model", "monitor", "status"], &[])
    }

    pub fn start_monitor(&self) -> Result<MessageResponse, ApiError> {
        self.transport
            .call_json(Method::Post, &["model", "monitor", "start"], &[])
    }

    pub fn stop_monitor(&self) -> Result<MessageResponse, ApiError> {
        self.transport
            .call_json(Method::Post, &["model", "monitor", "stop"], &[])
    }
}
