//! HTTP transport for the generation service
//!
//! Thin wrapper over `reqwest` that normalizes every request into a
//! [`ApiResponse`] (decoded body plus advisory rate-limit counters) or a
//! [`TransportError`]. The transport never retries: a non-2xx status or a
//! connection failure is fatal for that attempt, and retry policy lives in
//! the orchestrators.
//!
//! All entry points take a [`CancellationToken`]; triggering it drops the
//! in-flight request future, which aborts the underlying connection rather
//! than merely abandoning the await.

use std::path::PathBuf;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::ApiConfig;
use crate::error::{Error, Result, TransportError};
use crate::types::RateLimitInfo;

/// Maximum number of body characters carried inside a status error
const STATUS_BODY_LIMIT: usize = 512;

/// A normalized successful response from the service
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// HTTP status code (always 2xx)
    pub status: u16,
    /// Decoded response body
    pub data: T,
    /// Rate-limit counters from response headers, when present
    pub rate_limit: Option<RateLimitInfo>,
}

/// A binary field attached to a multipart submission (e.g. a control image)
#[derive(Clone, Debug)]
pub struct MultipartFile {
    /// Multipart field name
    pub field: String,
    /// Filename reported in the part headers
    pub filename: String,
    /// Raw file bytes
    pub bytes: Vec<u8>,
}

/// HTTP transport bound to one service base URL and API key
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    last_rate_limit: std::sync::Mutex<Option<RateLimitInfo>>,
}

impl Transport {
    /// Build a transport from the API configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::BuildClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            last_rate_limit: std::sync::Mutex::new(None),
        })
    }

    /// The most recent rate-limit counters seen on any response
    pub fn last_rate_limit(&self) -> Option<RateLimitInfo> {
        self.last_rate_limit
            .lock()
            .ok()
            .and_then(|guard| *guard)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("x-api-key", &self.api_key)
        }
    }

    /// `GET {base}/{path}`, decoding the JSON body into `T`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>> {
        let url = self.endpoint(path);
        trace!(%url, "GET");
        let builder = self.authorized(self.client.get(&url));
        self.execute(builder, url, cancel).await
    }

    /// `POST {base}/{path}` with a JSON body, decoding the JSON response into `T`
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>> {
        let url = self.endpoint(path);
        trace!(%url, "POST");
        let builder = self.authorized(self.client.post(&url)).json(body);
        self.execute(builder, url, cancel).await
    }

    /// `POST {base}/{path}` as multipart form data
    ///
    /// String fields are sent as text parts; `file`, when present, is sent
    /// as a binary part with its reported filename.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: Vec<(String, String)>,
        file: Option<MultipartFile>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>> {
        let url = self.endpoint(path);
        trace!(%url, "POST (multipart)");

        let mut form = reqwest::multipart::Form::new();
        for (name, value) in fields {
            form = form.text(name, value);
        }
        if let Some(file) = file {
            let part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.filename);
            form = form.part(file.field, part);
        }

        let builder = self.authorized(self.client.post(&url)).multipart(form);
        self.execute(builder, url, cancel).await
    }

    /// `DELETE {base}/{path}`, decoding the JSON response into `T`
    pub async fn delete_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>> {
        let url = self.endpoint(path);
        trace!(%url, "DELETE");
        let builder = self.authorized(self.client.delete(&url));
        self.execute(builder, url, cancel).await
    }

    /// Download a binary artifact from an absolute URL into memory
    ///
    /// The API key is not attached — artifact URLs are served from storage
    /// hosts and may be pre-signed.
    pub async fn download_bytes(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let response = self.start_download(url, cancel).await?;
        let mut stream = response.bytes_stream();
        let mut buf = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                c = stream.next() => c,
            };
            match chunk {
                Some(chunk) => buf.extend_from_slice(&chunk.map_err(TransportError::Network)?),
                None => break,
            }
        }
        Ok(buf)
    }

    /// Download a binary artifact from an absolute URL, streaming to `path`
    ///
    /// Cancellation removes the partial file. The API key is not attached —
    /// artifact URLs are served from storage hosts and may be pre-signed.
    pub async fn download_to_file(
        &self,
        url: &str,
        path: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let response = self.start_download(url, cancel).await?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(&path).await?;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(Error::Cancelled);
                }
                c = stream.next() => c,
            };
            match chunk {
                Some(chunk) => {
                    file.write_all(&chunk.map_err(TransportError::Network)?).await?;
                }
                None => break,
            }
        }
        file.flush().await?;
        Ok(path)
    }

    async fn start_download(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        debug!(%url, "downloading artifact");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = self.client.get(url).send() => r.map_err(TransportError::Network)?,
        };

        let status = response.status();
        self.record_rate_limit(response.headers());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(TransportError::Status {
                code: status.as_u16(),
                url: url.to_string(),
                body: truncate(body),
            }));
        }
        Ok(response)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        url: String,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<T>> {
        let attempt = async {
            let response = builder.send().await.map_err(TransportError::Network)?;
            let status = response.status();
            let rate_limit = self.record_rate_limit(response.headers());

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Transport(TransportError::Status {
                    code: status.as_u16(),
                    url: url.clone(),
                    body: truncate(body),
                }));
            }

            let data = response
                .json::<T>()
                .await
                .map_err(|e| TransportError::MalformedResponse {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

            Ok(ApiResponse {
                status: status.as_u16(),
                data,
                rate_limit,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = attempt => result,
        }
    }

    fn record_rate_limit(&self, headers: &HeaderMap) -> Option<RateLimitInfo> {
        let info = parse_rate_limit(headers);
        if let Some(info) = info
            && let Ok(mut guard) = self.last_rate_limit.lock()
        {
            *guard = Some(info);
        }
        info
    }
}

/// Parse `x-ratelimit-remaining` / `x-ratelimit-limit` headers
///
/// Both headers must be present and numeric; anything else yields `None`.
fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let parse = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
    };
    let remaining = parse("x-ratelimit-remaining")?;
    let limit = parse("x-ratelimit-limit")?;
    Some(RateLimitInfo { remaining, limit })
}

fn truncate(mut body: String) -> String {
    if body.len() > STATUS_BODY_LIMIT {
        body.truncate(STATUS_BODY_LIMIT);
        body.push_str("...");
    }
    body
}
