//! One HTTP request per call against the configured backend base URL.

use std::io::Write;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::error::{ApiError, request_failed};
use super::multipart::MultipartForm;
use crate::http_client;

/// Largest error payload read when extracting a `detail` message.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

enum Body<'a> {
    Empty,
    Json(&'a serde_json::Value),
    Raw {
        content_type: String,
        bytes: Vec<u8>,
    },
}

/// Issues requests relative to a base URL and normalizes the outcome.
///
/// No retries and no caching: every call is exactly one request.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    base_url: Url,
    agent: ureq::Agent,
    max_response_bytes: usize,
}

impl HttpTransport {
    pub fn new(base_url: Url, request_timeout: Option<Duration>, max_response_bytes: usize) -> Self {
        Self {
            base_url,
            agent: http_client::build_agent(request_timeout),
            max_response_bytes,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve path segments against the base URL, percent-encoding each one.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ApiError::Validation(format!("Base URL {} cannot carry a path", self.base_url))
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    /// Send a request without a body and decode the JSON response.
    pub fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self.execute(method, segments, query, Body::Empty)?;
        self.decode_json(response)
    }

    /// Send a JSON body and decode the JSON response.
    pub fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: &B,
    ) -> Result<T, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|err| ApiError::Validation(format!("Unserializable request body: {err}")))?;
        let response = self.execute(method, segments, query, Body::Json(&value))?;
        self.decode_json(response)
    }

    /// POST a multipart form and decode the JSON response.
    pub fn send_multipart<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        form: &MultipartForm,
    ) -> Result<T, ApiError> {
        let body = Body::Raw {
            content_type: form.content_type(),
            bytes: form.to_bytes(),
        };
        let response = self.execute(Method::Post, segments, &[], body)?;
        self.decode_json(response)
    }

    /// GET a binary body into memory.
    pub fn get_bytes(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Vec<u8>, ApiError> {
        let response = self.execute(Method::Get, segments, query, Body::Empty)?;
        http_client::read_response_bytes(response, self.max_response_bytes)
            .map_err(|err| ApiError::Network(format!("Failed to read response body: {err}")))
    }

    /// GET a binary body and stream it into `writer`, returning the byte count.
    pub fn download(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        writer: &mut impl Write,
    ) -> Result<u64, ApiError> {
        let response = self.execute(Method::Get, segments, query, Body::Empty)?;
        http_client::copy_response_to_writer(response, writer, self.max_response_bytes)
            .map_err(|err| ApiError::Network(format!("Failed to read response body: {err}")))
    }

    fn execute(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Body<'_>,
    ) -> Result<ureq::Response, ApiError> {
        let url = self.endpoint(segments)?;
        let mut request = self
            .agent
            .request_url(method.as_str(), &url)
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        tracing::debug!("{} {}", method.as_str(), url);
        let result = match body {
            Body::Empty => request.call(),
            Body::Json(value) => request.send_json(value),
            Body::Raw {
                content_type,
                bytes,
            } => request.set("Content-Type", &content_type).send_bytes(&bytes),
        };
        match result {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(code, response)) => {
                let status_text = response.status_text().to_string();
                let body = http_client::read_response_bytes(response, MAX_ERROR_BODY_BYTES)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default();
                let err = request_failed(code, &status_text, &body);
                tracing::debug!("{} {} failed with {code}: {err}", method.as_str(), url);
                Err(err)
            }
            Err(ureq::Error::Transport(err)) => Err(ApiError::Network(err.to_string())),
        }
    }

    fn decode_json<T: DeserializeOwned>(&self, response: ureq::Response) -> Result<T, ApiError> {
        let bytes = http_client::read_response_bytes(response, self.max_response_bytes)
            .map_err(|err| ApiError::Network(format!("Failed to read response body: {err}")))?;
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
    }
}
