//! HTTP side of downloads and uploads.
//!
//! A `downloadFile` or `uploadFile` operation only hands out a
//! server-relative URL path. The file contents then move over plain HTTP
//! against the server's base URL: a `GET` for downloads, and a multipart
//! `POST` with a single `file` field for uploads. Each URL is single use.

use std::path::{Path, PathBuf};

use protocol::{DownloadDescriptor, UploadReply};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Download and upload errors.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("server refused the {0}")]
    Refused(&'static str),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for transfers.
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// HTTP client bound to one server's base URL.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
    base_url: String,
}

impl HttpTransfer {
    /// Creates a transfer client for `base_url`, e.g. `http://localhost:32300`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Creates a transfer client reusing an existing `reqwest` client.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// The HTTP base URL paths are joined onto.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches a prepared download into `dest`. Returns the byte count.
    pub async fn download(&self, descriptor: &DownloadDescriptor, dest: &Path) -> TransferResult<u64> {
        if !descriptor.is_available() {
            return Err(TransferError::Refused("download"));
        }
        let url = descriptor.resolve(&self.base_url);
        tracing::debug!(url = %url, dest = ?dest, "Downloading");

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| TransferError::Http {
                url: url.clone(),
                source,
            })?;
        check_status(&url, response.status())?;

        let io_err = |source| TransferError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|source| TransferError::Http {
            url: url.clone(),
            source,
        })? {
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;

        tracing::info!(url = %url, bytes = written, "Download complete");
        Ok(written)
    }

    /// Posts the contents of `source` to an upload target path.
    ///
    /// `target` is the path returned by an `uploadFile` request; an empty
    /// target means the server refused. Returns the byte count.
    pub async fn upload(&self, target: &str, source: &Path) -> TransferResult<u64> {
        let url = UploadReply::Target(target.to_string())
            .resolve(&self.base_url)
            .ok_or(TransferError::Refused("upload"))?;

        let data = tokio::fs::read(source)
            .await
            .map_err(|e| TransferError::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
        let size = data.len() as u64;
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        tracing::debug!(url = %url, source = ?source, bytes = size, "Uploading");

        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|source| TransferError::Http {
                url: url.clone(),
                source,
            })?;
        check_status(&url, response.status())?;

        tracing::info!(url = %url, bytes = size, "Upload complete");
        Ok(size)
    }
}

fn check_status(url: &str, status: StatusCode) -> TransferResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransferError::Status {
            url: url.to_string(),
            status,
        })
    }
}
