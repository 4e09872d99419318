//! Dictionary blob download
//!
//! Streams a trie file over HTTP with progress reporting and prompt
//! cancellation, then gunzips it when the body is still compressed.

use crate::error::FetchError;
use crate::util::{gunzip, is_gzip};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Download progress sent to front ends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchProgress {
    /// Bytes received so far
    pub downloaded: u64,
    /// Body size from `Content-Length`, when the server sent one
    pub total: Option<u64>,
    pub state: DownloadState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Starting,
    Downloading,
    Decompressing,
    Completed,
    Failed,
    Cancelled,
}

/// HTTP client for dictionary blobs
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Download `url` and return the decompressed payload.
    ///
    /// Setting `cancel_rx` to `true` stops the transfer at the next await
    /// point; nothing read so far is kept.
    pub async fn fetch(
        &self,
        url: &str,
        progress_tx: Option<&mpsc::Sender<FetchProgress>>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<Vec<u8>, FetchError> {
        let mut progress = FetchProgress {
            downloaded: 0,
            total: None,
            state: DownloadState::Starting,
        };

        match self.download(url, progress_tx, cancel_rx, &mut progress).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                progress.state = match e {
                    FetchError::Cancelled => {
                        info!(url, downloaded = progress.downloaded, "Download cancelled");
                        DownloadState::Cancelled
                    }
                    _ => {
                        warn!(url, error = %e, "Download failed");
                        DownloadState::Failed
                    }
                };
                report(progress_tx, &progress).await;
                Err(e)
            }
        }
    }

    async fn download(
        &self,
        url: &str,
        progress_tx: Option<&mpsc::Sender<FetchProgress>>,
        cancel_rx: &mut watch::Receiver<bool>,
        progress: &mut FetchProgress,
    ) -> Result<Vec<u8>, FetchError> {
        if *cancel_rx.borrow() {
            return Err(FetchError::Cancelled);
        }
        debug!(url, "Starting download");

        let response = tokio::select! {
            biased;
            _ = cancelled(cancel_rx) => return Err(FetchError::Cancelled),
            response = self.client.get(url).send() => response.map_err(network)?,
        };
        if !response.status().is_success() {
            return Err(FetchError::Http(response.status().as_u16()));
        }

        progress.total = response.content_length();
        report(progress_tx, progress).await;

        let mut body = Vec::with_capacity(progress.total.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        progress.state = DownloadState::Downloading;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancelled(cancel_rx) => return Err(FetchError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(network)?;
            body.extend_from_slice(&chunk);
            progress.downloaded += chunk.len() as u64;
            report(progress_tx, progress).await;
        }

        let bytes = if is_gzip(&body) {
            progress.state = DownloadState::Decompressing;
            report(progress_tx, progress).await;
            tokio::task::spawn_blocking(move || gunzip(&body))
                .await
                .map_err(|e| FetchError::Decompress(e.to_string()))?
                .map_err(|e| FetchError::Decompress(e.to_string()))?
        } else {
            body
        };

        progress.state = DownloadState::Completed;
        report(progress_tx, progress).await;
        info!(url, downloaded = progress.downloaded, size = bytes.len(), "Download complete");
        Ok(bytes)
    }
}

fn network(e: reqwest::Error) -> FetchError {
    match e.status() {
        Some(status) => FetchError::Http(status.as_u16()),
        None => FetchError::Network(e.to_string()),
    }
}

// Send progress update (ignore send errors, the receiver may be gone)
async fn report(progress_tx: Option<&mpsc::Sender<FetchProgress>>, progress: &FetchProgress) {
    if let Some(tx) = progress_tx {
        let _ = tx.send(progress.clone()).await;
    }
}

/// Resolves once the flag is set. A dropped sender can never cancel.
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// One download's cancel flag, handed out by [`Downloads::begin`]
pub struct DownloadTicket {
    pub id: u64,
    pub cancel_rx: watch::Receiver<bool>,
}

/// Tracks the in-flight download so a new one cancels the old one
#[derive(Default)]
pub struct Downloads {
    current: Mutex<Option<(u64, watch::Sender<bool>)>>,
    next_id: AtomicU64,
}

impl Downloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever is in flight and register a new download
    pub fn begin(&self) -> DownloadTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace((id, cancel_tx));
        if let Some((old, tx)) = previous {
            debug!(download = old, "Cancelling superseded download");
            let _ = tx.send(true);
        }
        DownloadTicket { id, cancel_rx }
    }

    /// Cancel the in-flight download, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match current {
            Some((_, tx)) => tx.send(true).is_ok(),
            None => false,
        }
    }

    /// Forget download `id` once it has finished
    pub fn finish(&self, id: u64) {
        let mut current = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(&*current, Some((current_id, _)) if *current_id == id) {
            *current = None;
        }
    }
}

/// Check `bytes` against a `sha256:`-prefixed or bare hex digest
pub fn verify_hash(bytes: &[u8], expected: &str) -> Result<(), FetchError> {
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(FetchError::HashMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
