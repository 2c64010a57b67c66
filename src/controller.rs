//! User-intent handlers that bridge the API client and the store.
//!
//! Every action raises the loading flag for its duration, clears the previous
//! action error, and writes any failure into the store's error slot before
//! handing the result back to the caller.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{
    ApiClient, ApiError, BackupReceipt, ClassList, DatasetAnalysis, DetectionResult, ExportFormat,
    ImageSize, LabelingReceipt, MessageResponse, ModelComparison, ModelInfo, TrainingDataStats,
    TrainingHistoryEntry, TrainingMetrics, TrainingMode, TrainingResults, TrainingStatus,
    ValidationMetrics, validation,
};
use crate::config::{ClientConfig, PollingSettings};
use crate::labeling::{self, BoundingBoxLabel, EditingImage, EditingImageError, LabelPalette, Point};
use crate::polling::{PollEvent, PollHandle, PollOptions, Poller};
use crate::store::{ActiveTab, AppStore};

/// Message shown when training is requested against an empty dataset.
pub const NO_TRAINING_DATA: &str = "No training data available";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Image(#[from] EditingImageError),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ControllerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }
}

fn invalid(message: impl Into<String>) -> ControllerError {
    ControllerError::Api(ApiError::Validation(message.into()))
}

pub struct AppController {
    api: Arc<ApiClient>,
    store: Arc<AppStore>,
    polling: PollingSettings,
    palette: Mutex<LabelPalette>,
}

impl AppController {
    pub fn new(api: ApiClient, store: Arc<AppStore>, polling: PollingSettings) -> Self {
        Self {
            api: Arc::new(api),
            store,
            polling,
            palette: Mutex::new(LabelPalette::new()),
        }
    }

    pub fn from_config(config: &ClientConfig, store: Arc<AppStore>) -> Self {
        Self::new(ApiClient::new(&config.api), store, config.polling)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn store(&self) -> &Arc<AppStore> {
        &self.store
    }

    fn run<T>(
        &self,
        action: &str,
        op: impl FnOnce(&ApiClient) -> Result<T, ControllerError>,
    ) -> Result<T, ControllerError> {
        self.store.set_loading(true);
        self.store.set_error(None);
        let result = op(&self.api);
        self.store.set_loading(false);
        if let Err(err) = &result {
            warn!("{action} failed: {err}");
            self.store.set_error(Some(err.to_string()));
        }
        result
    }

    pub fn detect(
        &self,
        image_path: &Path,
        confidence: Option<f64>,
    ) -> Result<DetectionResult, ControllerError> {
        self.run("Detection", |api| {
            let payload = labeling_payload(image_path)?;
            let result = match confidence {
                Some(confidence) => api.detect_with_confidence(&payload, confidence)?,
                None => api.detect(&payload)?,
            };
            info!(
                "Detected {} objects in {}",
                result.detections.len(),
                image_path.display()
            );
            self.store.set_detection_results(Some(result.clone()));
            Ok(result)
        })
    }

    /// Begin a labeling session on `image_path`, discarding any unsaved boxes.
    pub fn open_image(&self, image_path: &Path) -> Result<EditingImage, ControllerError> {
        self.run("Opening image", |_| {
            let image = EditingImage::open(image_path)?;
            self.store.clear_labels();
            self.store.set_current_image(Some(image.clone()));
            self.store.set_labeling_mode(true);
            self.store.set_active_tab(ActiveTab::Labeling);
            if let Ok(mut palette) = self.palette.lock() {
                palette.reset();
            }
            Ok(image)
        })
    }

    /// Add a box drawn from `start` to `end` on the current image.
    pub fn add_label_from_drag(
        &self,
        start: Point,
        end: Point,
        label: &str,
    ) -> Result<BoundingBoxLabel, ControllerError> {
        let size = self.current_image_size()?;
        let color = self.next_color();
        let label = BoundingBoxLabel::from_drag(start, end, size, label, color);
        self.push_label(label)
    }

    /// Add a box given its top-left corner and size on the current image.
    pub fn add_label(
        &self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        label: &str,
    ) -> Result<BoundingBoxLabel, ControllerError> {
        let size = self.current_image_size()?;
        let color = self.next_color();
        let label = BoundingBoxLabel::new(x, y, width, height, label, color).clipped(size);
        self.push_label(label)
    }

    pub fn remove_label(&self, index: usize) -> Option<BoundingBoxLabel> {
        self.store.remove_label(index)
    }

    fn push_label(&self, label: BoundingBoxLabel) -> Result<BoundingBoxLabel, ControllerError> {
        let result = if label.label.is_empty() {
            Err(invalid("Label name must not be empty"))
        } else if label.is_degenerate() {
            Err(invalid("Bounding box has no area inside the image"))
        } else {
            self.store.add_label(label.clone());
            Ok(label)
        };
        if let Err(err) = &result {
            self.store.set_error(Some(err.to_string()));
        }
        result
    }

    fn current_image_size(&self) -> Result<ImageSize, ControllerError> {
        self.store
            .current_image()
            .map(|image| image.size())
            .ok_or_else(|| {
                let err = invalid("No image selected for labeling");
                self.store.set_error(Some(err.to_string()));
                err
            })
    }

    fn next_color(&self) -> String {
        self.palette
            .lock()
            .map(|mut palette| palette.next_color())
            .unwrap_or("#ff3b30")
            .to_string()
    }

    /// Upload the current image and its boxes; the label list is cleared on success.
    pub fn submit_labels(&self) -> Result<LabelingReceipt, ControllerError> {
        self.run("Submitting labels", |api| {
            let image = self
                .store
                .current_image()
                .ok_or_else(|| invalid("No image selected for labeling"))?;
            let labels = self.store.labels();
            if labels.is_empty() {
                return Err(invalid("Add at least one bounding box before submitting"));
            }
            if labels.iter().any(BoundingBoxLabel::is_degenerate) {
                return Err(invalid("Bounding boxes must have a non-zero area"));
            }
            let payload = image
                .payload()
                .map_err(|err| ControllerError::io(&image.path, err))?;
            let data = labeling::labeling_data(&labels, image.size());
            let receipt = api.submit_labeling_data(&payload, &data)?;
            info!(
                "Submitted {} labels for {}",
                labels.len(),
                image.path.display()
            );
            self.store.clear_labels();
            Ok(receipt)
        })
    }

    /// Start fine-tuning from user-typed epochs.
    ///
    /// Rejected locally when the input is not a whole number in range or the
    /// last known dataset analysis has no images.
    pub fn start_training(
        &self,
        epochs_input: &str,
        mode: TrainingMode,
    ) -> Result<MessageResponse, ControllerError> {
        self.run("Starting training", |api| {
            let epochs = validation::parse_epochs(epochs_input)?;
            if self
                .store
                .dataset_analysis()
                .is_some_and(|analysis| analysis.total_images == 0)
            {
                return Err(invalid(NO_TRAINING_DATA));
            }
            let response = api.start_training(i64::from(epochs), mode)?;
            let mut status = self.store.training_status();
            status.is_training = true;
            status.total_epochs = epochs;
            self.store.set_training_status(status);
            Ok(response)
        })
    }

    /// Follow a just-started job with the fast, bounded poll.
    pub fn watch_training(&self, events: Option<Sender<PollEvent>>) -> PollHandle {
        let mut options = PollOptions::training_watch(&self.polling).stop_when_idle(true);
        if let Some(events) = events {
            options = options.with_events(events);
        }
        Poller::spawn(Arc::clone(&self.api), Arc::clone(&self.store), options)
    }

    /// Keep status eventually consistent for as long as the handle lives.
    pub fn start_background_polling(&self, events: Option<Sender<PollEvent>>) -> PollHandle {
        let mut options = PollOptions::background(&self.polling);
        if let Some(events) = events {
            options = options.with_events(events);
        }
        Poller::spawn(Arc::clone(&self.api), Arc::clone(&self.store), options)
    }

    pub fn refresh_status(&self) -> Result<TrainingStatus, ControllerError> {
        self.run("Refreshing training status", |api| {
            let status = api.training_status()?;
            self.store.set_training_status(status.clone());
            Ok(status)
        })
    }

    pub fn refresh_history(&self) -> Result<Vec<TrainingHistoryEntry>, ControllerError> {
        self.run("Refreshing training history", |api| {
            let history = api.training_history()?;
            self.store.set_training_history(history.clone());
            Ok(history)
        })
    }

    pub fn refresh_models(&self) -> Result<Vec<ModelInfo>, ControllerError> {
        self.run("Refreshing models", |api| {
            let models = api.available_models()?;
            self.store.set_models(models.clone());
            Ok(models)
        })
    }

    pub fn refresh_analysis(&self) -> Result<DatasetAnalysis, ControllerError> {
        self.run("Analyzing dataset", |api| {
            let analysis = api.dataset_analysis()?;
            self.store.set_dataset_analysis(Some(analysis.clone()));
            Ok(analysis)
        })
    }

    pub fn load_model(&self, model_path: &str) -> Result<MessageResponse, ControllerError> {
        self.run("Loading model", |api| {
            let model_path = model_path.trim();
            if model_path.is_empty() {
                return Err(invalid("Model path must not be empty"));
            }
            let response = api.load_model(model_path)?;
            self.store.set_current_model(Some(model_path.to_string()));
            Ok(response)
        })
    }

    pub fn reload_model(&self, model_path: Option<&str>) -> Result<MessageResponse, ControllerError> {
        self.run("Reloading model", |api| {
            let response = api.reload_model(model_path)?;
            if let Some(path) = model_path {
                self.store.set_current_model(Some(path.to_string()));
            }
            Ok(response)
        })
    }

    pub fn backup_model(&self) -> Result<BackupReceipt, ControllerError> {
        self.run("Backing up model", |api| Ok(api.backup_model()?))
    }

    pub fn validate_model(
        &self,
        test_data_path: Option<&str>,
    ) -> Result<ValidationMetrics, ControllerError> {
        self.run("Validating model", |api| Ok(api.validate_model(test_data_path)?))
    }

    pub fn compare_models(&self) -> Result<ModelComparison, ControllerError> {
        self.run("Comparing models", |api| Ok(api.model_comparison()?))
    }

    /// Stream the exported archive next to `dest` and move it into place once
    /// the download completes. A failed export leaves `dest` as it was.
    pub fn export_training_data(
        &self,
        format: ExportFormat,
        dest: &Path,
    ) -> Result<u64, ControllerError> {
        self.run("Exporting training data", |api| {
            let dir = dest
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let mut temp =
                NamedTempFile::new_in(dir).map_err(|err| ControllerError::io(dir, err))?;
            let written = {
                let mut writer = BufWriter::new(&mut temp);
                let written = api.export_training_data_to(format, &mut writer)?;
                writer
                    .flush()
                    .map_err(|err| ControllerError::io(dest, err))?;
                written
            };
            temp.persist(dest)
                .map_err(|err| ControllerError::io(dest, err.error))?;
            info!("Exported {written} bytes to {}", dest.display());
            Ok(written)
        })
    }

    /// Delete old runs on the backend, then refresh history.
    pub fn cleanup_runs(&self, keep_latest: u32) -> Result<MessageResponse, ControllerError> {
        let response = self.run("Cleaning up training runs", |api| {
            Ok(api.cleanup_training_runs(keep_latest)?)
        })?;
        self.refresh_history()?;
        Ok(response)
    }

    pub fn training_metrics(&self, run_name: &str) -> Result<TrainingMetrics, ControllerError> {
        self.run("Fetching training metrics", |api| {
            validation::validate_run_name(run_name)?;
            Ok(api.training_metrics(run_name)?)
        })
    }

    /// Save one of a run's result plots to `dest`.
    pub fn save_training_plot(
        &self,
        run_name: &str,
        plot_name: &str,
        dest: &Path,
    ) -> Result<usize, ControllerError> {
        self.run("Fetching training plot", |api| {
            validation::validate_run_name(run_name)?;
            let bytes = api.training_plot(run_name, plot_name)?;
            std::fs::write(dest, &bytes).map_err(|err| ControllerError::io(dest, err))?;
            Ok(bytes.len())
        })
    }

    /// Run directories on the backend with their final metrics.
    pub fn training_results(&self) -> Result<TrainingResults, ControllerError> {
        self.run("Fetching training results", |api| Ok(api.training_results()?))
    }

    pub fn training_data_stats(&self) -> Result<TrainingDataStats, ControllerError> {
        self.run("Fetching training data stats", |api| {
            Ok(api.training_data_stats()?)
        })
    }

    pub fn classes(&self) -> Result<ClassList, ControllerError> {
        self.run("Fetching classes", |api| Ok(api.classes()?))
    }

    pub fn add_classes(&self, classes: &[String]) -> Result<ClassList, ControllerError> {
        self.run("Adding classes", |api| Ok(api.add_classes(classes)?))
    }

    pub fn clear_classes(&self) -> Result<MessageResponse, ControllerError> {
        self.run("Clearing classes", |api| Ok(api.clear_classes()?))
    }
}

fn labeling_payload(path: &Path) -> Result<crate::api::ImagePayload, ControllerError> {
    crate::api::ImagePayload::from_path(path).map_err(|err| ControllerError::io(path, err))
}
