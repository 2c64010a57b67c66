//! Client-side state store.
//!
//! [`AppStore`] holds the latest backend snapshots plus UI selection state in
//! memory. It is shared as `Arc<AppStore>`; each slice sits behind its own
//! lock, reads hand out clones, and writes replace the slice wholesale. The
//! label list is the one slice that is also mutated in place.
//!
//! Every slice has a single setter except the error slot, whose setter is a
//! family of three origin-aware writers sharing one lock:
//! [`AppStore::set_error`] for user actions, and
//! [`AppStore::record_poll_error`] / [`AppStore::clear_poll_error`] for the
//! poll loop. A poll write never replaces or clears an action error.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::api::{DatasetAnalysis, DetectionResult, ModelInfo, TrainingHistoryEntry, TrainingStatus};
use crate::labeling::{BoundingBoxLabel, EditingImage};

/// Top-level screen the user is looking at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActiveTab {
    #[default]
    Detection,
    Labeling,
    Training,
    Models,
    Analytics,
}

/// Who put the current error in the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// A user-triggered action.
    Action,
    /// The background poll loop.
    Poll,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoreError {
    pub message: String,
    pub origin: ErrorOrigin,
}

struct Slice<T> {
    name: &'static str,
    lock: RwLock<T>,
}

impl<T: Clone> Slice<T> {
    fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            lock: RwLock::new(value),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, T> {
        self.lock.read().unwrap_or_else(|poisoned| {
            warn!("Store slice '{}' poisoned; recovering.", self.name);
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.lock.write().unwrap_or_else(|poisoned| {
            warn!("Store slice '{}' poisoned; recovering.", self.name);
            poisoned.into_inner()
        })
    }

    fn get(&self) -> T {
        self.read().clone()
    }

    fn set(&self, value: T) {
        *self.write() = value;
    }
}

pub struct AppStore {
    training_status: Slice<TrainingStatus>,
    training_history: Slice<Vec<TrainingHistoryEntry>>,
    models: Slice<Vec<ModelInfo>>,
    current_model: Slice<Option<String>>,
    dataset_analysis: Slice<Option<DatasetAnalysis>>,
    active_tab: Slice<ActiveTab>,
    loading: Slice<bool>,
    error: Slice<Option<StoreError>>,
    detection_results: Slice<Option<DetectionResult>>,
    labeling_mode: Slice<bool>,
    current_image: Slice<Option<EditingImage>>,
    labels: Slice<Vec<BoundingBoxLabel>>,
    dark_mode: Slice<bool>,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AppStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStore")
            .field("training_status", &*self.training_status.read())
            .field("active_tab", &*self.active_tab.read())
            .field("loading", &*self.loading.read())
            .field("error", &*self.error.read())
            .finish_non_exhaustive()
    }
}

impl AppStore {
    pub fn new() -> Self {
        Self {
            training_status: Slice::new("training_status", TrainingStatus::default()),
            training_history: Slice::new("training_history", Vec::new()),
            models: Slice::new("models", Vec::new()),
            current_model: Slice::new("current_model", None),
            dataset_analysis: Slice::new("dataset_analysis", None),
            active_tab: Slice::new("active_tab", ActiveTab::default()),
            loading: Slice::new("loading", false),
            error: Slice::new("error", None),
            detection_results: Slice::new("detection_results", None),
            labeling_mode: Slice::new("labeling_mode", false),
            current_image: Slice::new("current_image", None),
            labels: Slice::new("labels", Vec::new()),
            dark_mode: Slice::new("dark_mode", true),
        }
    }

    pub fn training_status(&self) -> TrainingStatus {
        self.training_status.get()
    }

    pub fn set_training_status(&self, status: TrainingStatus) {
        self.training_status.set(status);
    }

    pub fn training_history(&self) -> Vec<TrainingHistoryEntry> {
        self.training_history.get()
    }

    pub fn set_training_history(&self, history: Vec<TrainingHistoryEntry>) {
        self.training_history.set(history);
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        self.models.get()
    }

    pub fn set_models(&self, models: Vec<ModelInfo>) {
        self.models.set(models);
    }

    pub fn current_model(&self) -> Option<String> {
        self.current_model.get()
    }

    pub fn set_current_model(&self, model_path: Option<String>) {
        self.current_model.set(model_path);
    }

    pub fn dataset_analysis(&self) -> Option<DatasetAnalysis> {
        self.dataset_analysis.get()
    }

    pub fn set_dataset_analysis(&self, analysis: Option<DatasetAnalysis>) {
        self.dataset_analysis.set(analysis);
    }

    pub fn active_tab(&self) -> ActiveTab {
        self.active_tab.get()
    }

    pub fn set_active_tab(&self, tab: ActiveTab) {
        self.active_tab.set(tab);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.get()
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.set(loading);
    }

    /// Message of the current error, if any.
    pub fn error(&self) -> Option<String> {
        self.error.read().as_ref().map(|error| error.message.clone())
    }

    pub fn error_entry(&self) -> Option<StoreError> {
        self.error.get()
    }

    // Error slot writers. All three take the slot's write lock, so the
    // origin check and the write happen atomically.

    /// Replace the error slot with an action error; `None` dismisses any error.
    pub fn set_error(&self, message: Option<String>) {
        self.error.set(message.map(|message| StoreError {
            message,
            origin: ErrorOrigin::Action,
        }));
    }

    /// Record a background poll failure without hiding an action error.
    pub fn record_poll_error(&self, message: impl Into<String>) {
        let mut slot = self.error.write();
        if matches!(&*slot, Some(StoreError { origin: ErrorOrigin::Action, .. })) {
            return;
        }
        *slot = Some(StoreError {
            message: message.into(),
            origin: ErrorOrigin::Poll,
        });
    }

    /// Clear the slot only if it holds a poll error.
    pub fn clear_poll_error(&self) {
        let mut slot = self.error.write();
        if matches!(&*slot, Some(StoreError { origin: ErrorOrigin::Poll, .. })) {
            *slot = None;
        }
    }

    pub fn detection_results(&self) -> Option<DetectionResult> {
        self.detection_results.get()
    }

    pub fn set_detection_results(&self, results: Option<DetectionResult>) {
        self.detection_results.set(results);
    }

    pub fn labeling_mode(&self) -> bool {
        self.labeling_mode.get()
    }

    pub fn set_labeling_mode(&self, enabled: bool) {
        self.labeling_mode.set(enabled);
    }

    pub fn current_image(&self) -> Option<EditingImage> {
        self.current_image.get()
    }

    pub fn set_current_image(&self, image: Option<EditingImage>) {
        self.current_image.set(image);
    }

    pub fn labels(&self) -> Vec<BoundingBoxLabel> {
        self.labels.get()
    }

    pub fn set_labels(&self, labels: Vec<BoundingBoxLabel>) {
        self.labels.set(labels);
    }

    pub fn add_label(&self, label: BoundingBoxLabel) {
        self.labels.write().push(label);
    }

    /// Remove the label at `index`, shifting later ones down; out of range is a no-op.
    pub fn remove_label(&self, index: usize) -> Option<BoundingBoxLabel> {
        let mut labels = self.labels.write();
        (index < labels.len()).then(|| labels.remove(index))
    }

    pub fn clear_labels(&self) {
        self.labels.write().clear();
    }

    pub fn dark_mode(&self) -> bool {
        self.dark_mode.get()
    }

    pub fn set_dark_mode(&self, enabled: bool) {
        self.dark_mode.set(enabled);
    }
}
