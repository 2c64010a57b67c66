//! Typed client for the detection and fine-tuning backend.
//!
//! [`ApiClient`] exposes one method per remote operation on top of
//! [`transport::HttpTransport`]; every failure is an [`ApiError`] carrying the
//! backend's own detail text when it sent one.

mod endpoints;
mod error;
pub mod multipart;
pub mod transport;
pub mod types;
pub mod validation;

pub use endpoints::TrainingMode;
pub use error::ApiError;
pub use multipart::ImagePayload;
pub use types::*;

use url::Url;

use crate::config::{ApiSettings, EpochsEncoding};
use transport::HttpTransport;

#[derive(Clone, Debug)]
pub struct ApiClient {
    transport: HttpTransport,
    epochs_encoding: EpochsEncoding,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Self {
        Self {
            transport: HttpTransport::new(
                settings.base_url.clone(),
                settings.request_timeout,
                settings.max_response_bytes,
            ),
            epochs_encoding: settings.epochs_encoding,
        }
    }

    /// Client with default settings against `base_url`.
    pub fn with_base_url(base_url: Url) -> Self {
        Self::new(&ApiSettings {
            base_url,
            ..ApiSettings::default()
        })
    }

    pub fn base_url(&self) -> &Url {
        self.transport.base_url()
    }

    pub fn epochs_encoding(&self) -> EpochsEncoding {
        self.epochs_encoding
    }
}
