//! Client for a remote object-detection and fine-tuning backend.
//!
//! The crate wraps the backend's HTTP API in a typed client, keeps the latest
//! backend snapshots in an injectable store, reconciles training progress on a
//! background thread, and models the label-editing session used to collect
//! new training data.

/// Typed HTTP client for the backend.
pub mod api;
/// Application directory resolution.
pub mod app_dirs;
/// `dishlab` command-line front end.
pub mod cli;
/// Client configuration loading.
pub mod config;
/// User actions bridging the client and the store.
pub mod controller;
mod http_client;
/// Bounding-box editing over a source image.
pub mod labeling;
/// Logging setup and log file retention.
pub mod logging;
/// Background training status reconciliation.
pub mod polling;
/// Client-side state store.
pub mod store;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ApiError};
pub use controller::{AppController, ControllerError};
pub use store::AppStore;
