//! aria2 JSON-RPC download engine

use super::traits::DownloadEngine;
use crate::config::Aria2Config;
use crate::error::{DownloadError, Error, Result};
use crate::types::{DownloadHandle, DownloadStatus};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// aria2 error code for an unknown GID
const ARIA2_NOT_FOUND: i64 = 1;

/// Download engine backed by an aria2c daemon with `--enable-rpc`
pub struct Aria2Engine {
    client: reqwest::Client,
    rpc_url: String,
    secret: Option<String>,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Subset of `aria2.tellStatus` we read. Numbers arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TellStatus {
    status: String,
    #[serde(default)]
    total_length: String,
    #[serde(default)]
    completed_length: String,
    #[serde(default)]
    download_speed: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    files: Vec<TellFile>,
}

#[derive(Debug, Deserialize)]
struct TellFile {
    #[serde(default)]
    path: String,
}

impl Aria2Engine {
    /// Create an engine talking to the configured RPC endpoint
    pub fn new(config: &Aria2Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            secret: config.secret.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut all_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all_params.push(json!(format!("token:{}", secret)));
        }
        all_params.extend(params);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": all_params,
        });

        tracing::trace!(method, id, "aria2 RPC call");

        // aria2 answers RPC errors with HTTP 400 and a JSON body, so the body
        // is parsed regardless of status.
        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed: RpcResponse = serde_json::from_str(&text).map_err(|e| {
            if status.is_server_error() {
                Error::Transient(format!("aria2 returned HTTP {}", status))
            } else {
                Error::Serialization(e)
            }
        })?;

        if let Some(err) = parsed.error {
            return Err(DownloadError::Rpc {
                code: err.code,
                message: err.message,
            }
            .into());
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl DownloadEngine for Aria2Engine {
    async fn start(&self, url: &str, dir: &Path) -> Result<DownloadHandle> {
        validate_url(url)?;

        tokio::fs::create_dir_all(dir).await?;
        let dir = tokio::fs::canonicalize(dir).await?;
        let out = output_file_name(url);

        let result = self
            .call(
                "aria2.addUri",
                vec![
                    json!([url]),
                    json!({
                        "dir": dir.to_string_lossy(),
                        "out": out,
                    }),
                ],
            )
            .await
            .map_err(|e| match e {
                Error::Download(DownloadError::Rpc { message, .. }) => {
                    Error::Download(DownloadError::StartFailed { reason: message })
                }
                other => other,
            })?;

        let gid = result.as_str().filter(|g| !g.is_empty()).ok_or_else(|| {
            Error::Download(DownloadError::StartFailed {
                reason: "aria2 returned no GID".to_string(),
            })
        })?;

        tracing::info!(gid, url, out = %out, dir = %dir.display(), "Started aria2 download");
        Ok(DownloadHandle(gid.to_string()))
    }

    async fn status(&self, handle: &DownloadHandle) -> Result<DownloadStatus> {
        let result = self
            .call(
                "aria2.tellStatus",
                vec![
                    json!(handle.0),
                    json!([
                        "status",
                        "totalLength",
                        "completedLength",
                        "downloadSpeed",
                        "errorMessage",
                        "files"
                    ]),
                ],
            )
            .await
            .map_err(|e| match e {
                Error::Download(DownloadError::Rpc { code, .. }) if code == ARIA2_NOT_FOUND => {
                    Error::Download(DownloadError::HandleNotFound {
                        handle: handle.0.clone(),
                    })
                }
                other => other,
            })?;

        let tell: TellStatus = serde_json::from_value(result)?;
        Ok(to_download_status(tell))
    }

    async fn cancel(&self, handle: &DownloadHandle) -> Result<bool> {
        // Both calls fail with "not found" once the download is gone, which
        // is the outcome we want.
        match self.call("aria2.forceRemove", vec![json!(handle.0)]).await {
            Ok(_) => {}
            Err(Error::Download(DownloadError::Rpc { message, .. })) => {
                tracing::debug!(gid = %handle, %message, "forceRemove: download not active");
            }
            Err(e) => return Err(e),
        }
        match self
            .call("aria2.removeDownloadResult", vec![json!(handle.0)])
            .await
        {
            Ok(_) => {}
            Err(Error::Download(DownloadError::Rpc { message, .. })) => {
                tracing::debug!(gid = %handle, %message, "removeDownloadResult: no result to remove");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(gid = %handle, "Canceled aria2 download");
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "aria2"
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|_| Error::InvalidInput(format!("Invalid URL: {}", url)))?;
    match parsed.scheme() {
        "http" | "https" | "ftp" | "sftp" => {}
        _ => return Err(Error::InvalidInput(format!("Invalid URL: {}", url))),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidInput(format!("Invalid URL: {}", url)));
    }
    Ok(())
}

/// Output file name for a URL: decoded path basename, always ending in `.mkv`
pub fn output_file_name(url: &str) -> String {
    let basename = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty());

    let mut name = match basename {
        Some(name) => name,
        None => format!("video_{}.mkv", chrono::Utc::now().timestamp()),
    };
    if !name.to_lowercase().ends_with(".mkv") {
        name.push_str(".mkv");
    }

    let decoded = urlencoding::decode(&name)
        .map(|d| d.into_owned())
        .unwrap_or(name);
    // A decoded separator must not escape the staging directory
    decoded.replace(['/', '\\'], "_")
}

fn parse_count(value: &str) -> u64 {
    value.parse().unwrap_or(0)
}

fn to_download_status(tell: TellStatus) -> DownloadStatus {
    let file_path = tell
        .files
        .into_iter()
        .map(|f| f.path)
        .find(|p| !p.is_empty())
        .map(PathBuf::from);

    let (is_complete, has_failed, error_message) = match tell.status.as_str() {
        "complete" => (true, false, None),
        "error" => (
            false,
            true,
            Some(
                tell.error_message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
        ),
        "removed" => (false, true, Some("download was removed".to_string())),
        _ => (false, false, None),
    };

    DownloadStatus {
        is_complete,
        has_failed,
        error_message,
        completed_bytes: parse_count(&tell.completed_length),
        total_bytes: parse_count(&tell.total_length),
        speed: parse_count(&tell.download_speed),
        file_path,
    }
}
