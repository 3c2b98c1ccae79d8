use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::Url;
use tempfile::TempPath;
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];
const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid locator '{0}'")]
    InvalidLocator(String),

    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("download timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid content type '{0}'")]
    ContentType(String),

    #[error("resource exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("failed to write scratch file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else {
            DownloadError::Request(err)
        }
    }
}

/// A downloaded image on local disk.
///
/// The backing file lives in the scratch directory and is deleted when the
/// value is dropped.
#[derive(Debug)]
pub struct LocalResource {
    path: TempPath,
    content_type: String,
    size: u64,
}

impl LocalResource {
    /// Write `data` to a fresh scratch file in `dir`.
    pub async fn write(
        dir: &Path,
        extension: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Self, std::io::Error> {
        let path = tempfile::Builder::new()
            .prefix("img_")
            .suffix(&format!(".{extension}"))
            .tempfile_in(dir)?
            .into_temp_path();

        tokio::fs::write(&path, data).await?;

        Ok(Self {
            path,
            content_type: content_type.to_string(),
            size: data.len() as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Bytes written to the scratch file.
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<LocalResource, DownloadError>;
}

pub struct HttpDownloader {
    client: reqwest::Client,
    scratch_dir: PathBuf,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DownloadError::Request)?;

        Ok(Self {
            client,
            scratch_dir: scratch_dir.into(),
            max_bytes,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, locator: &str) -> Result<LocalResource, DownloadError> {
        let url = resolve_locator(locator)?;

        let mut resp = self.client.get(url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.to_ascii_lowercase().starts_with("image/") {
            return Err(DownloadError::ContentType(content_type));
        }

        if resp.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(DownloadError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = resp.chunk().await? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let resource =
            LocalResource::write(&self.scratch_dir, image_extension(&url), &content_type, &body)
                .await?;

        tracing::debug!(
            "Downloaded {} bytes ({content_type}) to {}",
            resource.size(),
            resource.path().display()
        );

        Ok(resource)
    }
}

/// Parse a locator and rewrite share links from known hosts into a form that
/// serves the file bytes directly.
pub fn resolve_locator(locator: &str) -> Result<Url, DownloadError> {
    let mut url = Url::parse(locator.trim())
        .map_err(|_| DownloadError::InvalidLocator(locator.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidLocator(locator.to_string()));
    }

    match url.host_str() {
        Some("drive.google.com") => {
            let file_id = drive_file_id(&url)
                .ok_or_else(|| DownloadError::InvalidLocator(locator.to_string()))?;
            url = Url::parse_with_params(
                "https://drive.google.com/uc",
                &[("export", "download"), ("id", file_id.as_str())],
            )
            .map_err(|_| DownloadError::InvalidLocator(locator.to_string()))?;
        }
        Some("www.dropbox.com" | "dropbox.com") => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "dl")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept)
                .append_pair("dl", "1");
        }
        _ => {}
    }

    Ok(url)
}

fn drive_file_id(url: &Url) -> Option<String> {
    if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "id") {
        return Some(id.into_owned()).filter(|id| !id.is_empty());
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(3)
        .find(|w| w[0] == "file" && w[1] == "d" && !w[2].is_empty())
        .map(|w| w[2].to_string())
}

fn image_extension(url: &Url) -> &'static str {
    let ext = Path::new(url.path())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    ext.and_then(|e| IMAGE_EXTENSIONS.iter().find(|known| **known == e).copied())
        .unwrap_or(DEFAULT_EXTENSION)
}
