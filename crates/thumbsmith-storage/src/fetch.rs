//! Source fetching for artifact ingest.
//!
//! Generated images arrive either as an HTTP(S) URL on the generation service's
//! CDN or inline as a `data:image/...;base64,` URI. Both are turned into bytes
//! plus a content type and file extension here.

use crate::traits::{StorageError, StorageResult};
use base64::{engine::general_purpose, Engine as _};
use bytes::{Bytes, BytesMut};
use std::time::Duration;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;
const FALLBACK_EXTENSION: &str = "png";

/// Bytes of a fetched source image.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub data: Bytes,
    pub content_type: String,
    pub extension: String,
}

#[derive(Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl SourceFetcher {
    pub fn new(max_bytes: usize) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                StorageError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client, max_bytes })
    }

    pub fn with_client(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }

    pub async fn fetch(&self, source_url: &str) -> StorageResult<FetchedSource> {
        let source_url = source_url.trim();
        if source_url.starts_with("data:") {
            return self.decode_data_uri(source_url);
        }

        let parsed = reqwest::Url::parse(source_url)
            .map_err(|_| StorageError::InvalidSource(format!("Invalid URL: {}", source_url)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(StorageError::InvalidSource(
                "Only HTTP and HTTPS URLs are allowed".to_string(),
            ));
        }

        let start = std::time::Instant::now();

        let mut response = self.client.get(parsed.clone()).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %source_url, "Failed to download source image");
            StorageError::DownloadFailed(format!("Failed to download {}: {}", source_url, e))
        })?;

        if !response.status().is_success() {
            return Err(StorageError::DownloadFailed(format!(
                "Source returned status code: {}",
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_bytes {
                return Err(StorageError::TooLarge {
                    size: length as usize,
                    limit: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("application/octet-stream")
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .trim()
            .to_lowercase();

        let url_extension = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase());

        let (content_type, extension) = resolve_image_type(&content_type, url_extension)?;

        // Body is read chunk by chunk so an oversized response without a
        // Content-Length header is cut off at the limit.
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to read response body: {}", e))
        })? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(StorageError::TooLarge {
                    size: body.len() + chunk.len(),
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(StorageError::DownloadFailed(
                "Source returned an empty body".to_string(),
            ));
        }

        tracing::debug!(
            url = %source_url,
            size_bytes = body.len(),
            content_type = %content_type,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Downloaded source image"
        );

        Ok(FetchedSource {
            data: body.freeze(),
            content_type,
            extension,
        })
    }

    fn decode_data_uri(&self, uri: &str) -> StorageResult<FetchedSource> {
        let rest = uri.strip_prefix("data:").unwrap_or(uri);
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| StorageError::InvalidSource("Malformed data URI".to_string()))?;

        let mut parts = meta.split(';');
        let media_type = parts.next().unwrap_or_default().trim().to_lowercase();
        if !parts.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
            return Err(StorageError::InvalidSource(
                "Only base64-encoded data URIs are supported".to_string(),
            ));
        }
        if !media_type.starts_with("image/") {
            return Err(StorageError::InvalidSource(format!(
                "Data URI is not an image: {}",
                media_type
            )));
        }

        // Decoded size is about 3/4 of the encoded length.
        if payload.len() / 4 * 3 > self.max_bytes {
            return Err(StorageError::TooLarge {
                size: payload.len() / 4 * 3,
                limit: self.max_bytes,
            });
        }

        let data = general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| StorageError::InvalidSource(format!("Invalid base64 payload: {}", e)))?;
        if data.is_empty() {
            return Err(StorageError::InvalidSource("Data URI is empty".to_string()));
        }

        let (content_type, extension) = resolve_image_type(&media_type, None)?;
        Ok(FetchedSource {
            data: Bytes::from(data),
            content_type,
            extension,
        })
    }
}

/// Pick the stored content type and extension from the reported MIME type,
/// falling back to the URL's extension when the server is vague.
fn resolve_image_type(
    content_type: &str,
    url_extension: Option<String>,
) -> StorageResult<(String, String)> {
    let from_mime = match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/avif" => Some("avif"),
        _ => None,
    };
    if let Some(ext) = from_mime {
        return Ok((content_type.to_string(), ext.to_string()));
    }

    if content_type.starts_with("image/") || content_type == "application/octet-stream" {
        let ext = url_extension
            .filter(|e| matches!(e.as_str(), "png" | "jpg" | "jpeg" | "webp" | "gif" | "avif"))
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        let mime = match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg".to_string(),
            other => format!("image/{}", other),
        };
        return Ok((mime, ext));
    }

    Err(StorageError::InvalidSource(format!(
        "Source is not an image: {}",
        content_type
    )))
}
