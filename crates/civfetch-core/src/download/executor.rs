//! Download executor: resolve a concrete file, stream it, verify it.
//!
//! Transfers write to `<destination>.part` and only rename onto the
//! destination after verification. A hash mismatch removes both paths, so
//! the destination never holds unverified bytes. Any other failure keeps the
//! `.part` file so the next attempt can resume with an HTTP `Range` request.

use super::hashing::{verify_async, ExpectedHash};
use crate::cancel::CancellationToken;
use crate::config::{AppConfig, ContentPolicy, NetworkConfig, ResolverConfig};
use crate::error::{ResolverError, Result};
use crate::registry::{ModelRegistry, RegistryFile, RegistryItem};
use crate::resolve::SearchCandidate;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// What to download.
#[derive(Debug, Clone)]
pub enum DownloadTarget {
    /// A ranked candidate; a pinned version on the candidate is honored.
    Candidate(SearchCandidate),
    /// A registry identifier, optionally with a specific version.
    Direct {
        model_id: u64,
        version_id: Option<u64>,
    },
}

/// A concrete downloadable file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFile {
    pub model_id: u64,
    pub model_name: String,
    pub version_id: u64,
    pub file_name: String,
    pub url: String,
    pub expected_hash: Option<ExpectedHash>,
    pub size_bytes: u64,
}

/// Progress snapshot passed to the progress callback.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub file_name: String,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Callback invoked after every written chunk.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync + 'static>;

/// Prefer a file flagged primary; otherwise the largest file.
pub fn select_file(files: &[RegistryFile]) -> Option<&RegistryFile> {
    files.iter().find(|f| f.is_primary()).or_else(|| {
        files
            .iter()
            .max_by(|a, b| a.size_kb.total_cmp(&b.size_kb))
    })
}

/// Reject content the policy disallows, regardless of match confidence.
pub fn check_policy(item: &RegistryItem, policy: &ContentPolicy) -> Result<()> {
    if item.poi {
        return Err(ResolverError::PolicyBlocked {
            reason: format!("model {} depicts a real person", item.id),
        });
    }
    if item.nsfw && !policy.allow_nsfw {
        return Err(ResolverError::PolicyBlocked {
            reason: format!("model {} is flagged as adult content", item.id),
        });
    }
    Ok(())
}

/// `<destination>.part`
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
    destination.with_file_name(name)
}

/// Marks a destination as in flight until dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.path);
    }
}

/// A fully transferred, not yet verified file.
pub struct StagedFile {
    part_path: PathBuf,
    destination: PathBuf,
    bytes: u64,
    _guard: InFlightGuard,
}

impl StagedFile {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("part_path", &self.part_path)
            .field("destination", &self.destination)
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Resolves, streams and verifies model files.
pub struct DownloadExecutor {
    registry: Arc<dyn ModelRegistry>,
    client: Client,
    auth_header: Option<String>,
    read_timeout: Duration,
    policy: ContentPolicy,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    progress: Option<ProgressCallback>,
}

impl DownloadExecutor {
    /// Create an executor. The download client has a connect timeout but no
    /// total timeout; stalls are bounded per chunk instead.
    pub fn new(registry: Arc<dyn ModelRegistry>, config: &ResolverConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(AppConfig::USER_AGENT)
            .build()
            .map_err(|e| ResolverError::Network {
                message: format!("Failed to create download client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            registry,
            client,
            auth_header: config
                .registry
                .api_token
                .as_ref()
                .map(|t| format!("Bearer {}", t)),
            read_timeout: config.download.read_timeout(),
            policy: config.policy.clone(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            progress: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Resolve a target to a concrete file, applying the content policy.
    pub async fn resolve(&self, target: &DownloadTarget) -> Result<ResolvedFile> {
        let (item, version_id) = match target {
            DownloadTarget::Candidate(candidate) => {
                let item = if candidate.item().model_versions.is_empty() {
                    self.registry.model_by_id(candidate.model_id()).await?
                } else {
                    candidate.item().clone()
                };
                (item, candidate.version_id())
            }
            DownloadTarget::Direct {
                model_id,
                version_id,
            } => (self.registry.model_by_id(*model_id).await?, *version_id),
        };

        check_policy(&item, &self.policy)?;

        let version = match version_id {
            Some(id) => item.version(id).ok_or_else(|| {
                ResolverError::NotFound(format!("version {} of model {}", id, item.id))
            })?,
            // The registry lists versions newest first.
            None => item.model_versions.first().ok_or_else(|| {
                ResolverError::NotFound(format!("model {} has no versions", item.id))
            })?,
        };

        let file = select_file(&version.files).ok_or_else(|| {
            ResolverError::NotFound(format!("version {} has no files", version.id))
        })?;

        let url = match (&file.download_url, file.is_primary()) {
            (Some(url), false) => url.clone(),
            _ => self.registry.download_url(version.id),
        };

        Ok(ResolvedFile {
            model_id: item.id,
            model_name: item.name.clone(),
            version_id: version.id,
            file_name: file.name.clone(),
            url,
            expected_hash: ExpectedHash::from_file(file),
            size_bytes: file.size_bytes(),
        })
    }

    fn claim(&self, destination: &Path) -> Result<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(destination.to_path_buf()) {
            return Err(ResolverError::DestinationBusy(destination.to_path_buf()));
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            path: destination.to_path_buf(),
        })
    }

    /// Stream `file` to `<destination>.part`, resuming an existing partial
    /// file when the server honors range requests.
    pub async fn transfer(
        &self,
        file: &ResolvedFile,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<StagedFile> {
        let guard = self.claim(destination)?;
        let part = part_path(destination);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ResolverError::io_with_path(e, parent))?;
        }

        let resume_from = tokio::fs::metadata(&part)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut request = self.client.get(&file.url);
        if let Some(ref auth) = self.auth_header {
            request = request.header("Authorization", auth);
        }
        if resume_from > 0 {
            request = request.header("Range", format!("bytes={}-", resume_from));
            info!("Resuming {} from byte {}", file.file_name, resume_from);
        }

        let response = tokio::time::timeout(self.read_timeout, request.send())
            .await
            .map_err(|_| ResolverError::Timeout(self.read_timeout))?
            .map_err(|e| ResolverError::Network {
                message: format!("Download request failed: {}", e),
                cause: Some(e.to_string()),
            })?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && resume_from > 0 {
            if file.size_bytes == 0 || resume_from == file.size_bytes {
                debug!("Partial file for {} already complete", file.file_name);
                return Ok(StagedFile {
                    part_path: part,
                    destination: destination.to_path_buf(),
                    bytes: resume_from,
                    _guard: guard,
                });
            }
            let _ = tokio::fs::remove_file(&part).await;
            return Err(ResolverError::Network {
                message: "Stale partial file rejected by server; restarting".to_string(),
                cause: None,
            });
        }
        if !status.is_success() {
            return Err(ResolverError::Registry {
                endpoint: file.url.clone(),
                status: status.as_u16(),
            });
        }

        let is_resuming = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
        if resume_from > 0 && !is_resuming {
            warn!("Server ignored Range request, restarting from zero");
        }

        let total = if is_resuming {
            response.content_length().map(|len| len + resume_from)
        } else {
            response.content_length()
        };

        let mut out = if is_resuming {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&part)
                .await
                .map_err(|e| ResolverError::io_with_path(e, &part))?
        } else {
            tokio::fs::File::create(&part)
                .await
                .map_err(|e| ResolverError::io_with_path(e, &part))?
        };

        let mut downloaded = if is_resuming { resume_from } else { 0 };
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| ResolverError::Timeout(self.read_timeout))?;
            let Some(chunk) = next else {
                break;
            };

            if cancel.is_cancelled() {
                drop(out);
                let _ = tokio::fs::remove_file(&part).await;
                return Err(ResolverError::Cancelled);
            }

            let chunk = chunk.map_err(|e| ResolverError::Network {
                message: format!("Download stream error: {}", e),
                cause: Some(e.to_string()),
            })?;

            out.write_all(&chunk)
                .await
                .map_err(|e| ResolverError::io_with_path(e, &part))?;
            downloaded += chunk.len() as u64;

            if let Some(ref callback) = self.progress {
                callback(DownloadProgress {
                    file_name: file.file_name.clone(),
                    downloaded_bytes: downloaded,
                    total_bytes: total,
                });
            }
        }

        out.flush()
            .await
            .map_err(|e| ResolverError::io_with_path(e, &part))?;
        drop(out);

        if let Some(total) = total {
            if downloaded != total {
                return Err(ResolverError::Network {
                    message: format!("Incomplete download: got {} of {} bytes", downloaded, total),
                    cause: None,
                });
            }
        }

        Ok(StagedFile {
            part_path: part,
            destination: destination.to_path_buf(),
            bytes: downloaded,
            _guard: guard,
        })
    }

    /// Verify a staged file and move it onto its destination.
    ///
    /// On a hash mismatch both the partial file and the destination are
    /// removed before the error is returned.
    pub async fn verify_and_commit(
        &self,
        staged: StagedFile,
        expected: Option<&ExpectedHash>,
    ) -> Result<PathBuf> {
        if let Some(expected) = expected {
            if let Err(e) = verify_async(staged.part_path.clone(), expected.clone()).await {
                if matches!(e, ResolverError::HashMismatch { .. }) {
                    warn!(
                        "Integrity check failed for {}: {}",
                        staged.destination.display(),
                        e
                    );
                    let _ = tokio::fs::remove_file(&staged.part_path).await;
                    let _ = tokio::fs::remove_file(&staged.destination).await;
                }
                return Err(e);
            }
        } else {
            debug!(
                "No published hash for {}, skipping verification",
                staged.destination.display()
            );
        }

        tokio::fs::rename(&staged.part_path, &staged.destination)
            .await
            .map_err(|e| ResolverError::Io {
                message: format!("Failed to move verified file into place: {}", e),
                path: Some(staged.destination.clone()),
                source: Some(e),
            })?;

        info!(
            "Downloaded {} ({} bytes)",
            staged.destination.display(),
            staged.bytes
        );
        Ok(staged.destination.clone())
    }

    /// Single-shot download: resolve, transfer, verify.
    pub async fn download(
        &self,
        target: &DownloadTarget,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        cancel.check()?;
        let file = self.resolve(target).await?;
        let staged = self.transfer(&file, destination, cancel).await?;
        self.verify_and_commit(staged, file.expected_hash.as_ref())
            .await
    }
}

impl std::fmt::Debug for DownloadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadExecutor")
            .field("read_timeout", &self.read_timeout)
            .field("policy", &self.policy)
            .field("has_auth", &self.auth_header.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CivitaiClient;
    use axum::extract::Path as AxumPath;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    async fn model(AxumPath(id): AxumPath<u64>) -> Json<serde_json::Value> {
        let hash = if id == 2 {
            "deadbeef".to_string()
        } else {
            sha256_hex(BODY).to_uppercase()
        };
        Json(serde_json::json!({
            "id": id,
            "name": format!("Model {}", id),
            "nsfw": id == 3,
            "modelVersions": [{
                "id": id * 100,
                "files": [
                    {"name": "small.pt", "sizeKB": 1.0, "hashes": {}},
                    {
                        "name": format!("model{}.safetensors", id),
                        "sizeKB": 0.03515625,
                        "primary": true,
                        "hashes": {"SHA256": hash}
                    }
                ]
            }]
        }))
    }

    async fn blob(headers: HeaderMap) -> impl IntoResponse {
        let start = headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.trim_end_matches('-').parse::<usize>().ok());
        match start {
            Some(start) if start < BODY.len() => (
                AxumStatus::PARTIAL_CONTENT,
                BODY[start..].to_vec(),
            ),
            _ => (AxumStatus::OK, BODY.to_vec()),
        }
    }

    async fn spawn() -> String {
        let app = Router::new()
            .route("/api/models/:id", get(model))
            .route("/download/:version", get(blob));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn executor(base: &str) -> DownloadExecutor {
        let mut config = ResolverConfig::default();
        config.registry.api_base = format!("{}/api", base);
        config.registry.download_base = format!("{}/download", base);
        config.download.read_timeout_secs = 5;
        let registry: Arc<dyn ModelRegistry> =
            Arc::new(CivitaiClient::new(&config.registry).unwrap());
        DownloadExecutor::new(registry, &config).unwrap()
    }

    #[test]
    fn test_select_file_prefers_primary_then_largest() {
        let files: Vec<RegistryFile> = serde_json::from_value(serde_json::json!([
            {"name": "a", "sizeKB": 10.0},
            {"name": "b", "sizeKB": 30.0},
            {"name": "c", "sizeKB": 20.0}
        ]))
        .unwrap();
        assert_eq!(select_file(&files).unwrap().name, "b");

        let mut with_primary = files.clone();
        with_primary[2].primary = Some(true);
        assert_eq!(select_file(&with_primary).unwrap().name, "c");
        assert!(select_file(&[]).is_none());
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/m/loras/x.safetensors")),
            PathBuf::from("/m/loras/x.safetensors.part")
        );
    }

    #[tokio::test]
    async fn test_direct_download_verifies_and_commits() {
        let base = spawn().await;
        let exec = executor(&base);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("loras/model1.safetensors");

        let path = exec
            .download(
                &DownloadTarget::Direct {
                    model_id: 1,
                    version_id: None,
                },
                &dest,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_resume_from_existing_part() {
        let base = spawn().await;
        let exec = executor(&base);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model1.safetensors");
        std::fs::write(part_path(&dest), &BODY[..10]).unwrap();

        exec.download(
            &DownloadTarget::Direct {
                model_id: 1,
                version_id: Some(100),
            },
            &dest,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_hash_mismatch_leaves_nothing_behind() {
        let base = spawn().await;
        let exec = executor(&base);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model2.safetensors");

        let err = exec
            .download(
                &DownloadTarget::Direct {
                    model_id: 2,
                    version_id: None,
                },
                &dest,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "integrity-mismatch");
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_policy_blocks_flagged_model() {
        let base = spawn().await;
        let exec = executor(&base);

        let err = exec
            .resolve(&DownloadTarget::Direct {
                model_id: 3,
                version_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "license-or-policy-block");
    }

    #[tokio::test]
    async fn test_unknown_version_is_not_found() {
        let base = spawn().await;
        let exec = executor(&base);

        let err = exec
            .resolve(&DownloadTarget::Direct {
                model_id: 1,
                version_id: Some(42),
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "not-found");
    }

    #[tokio::test]
    async fn test_same_destination_is_exclusive() {
        let base = spawn().await;
        let exec = executor(&base);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model1.safetensors");

        let file = exec
            .resolve(&DownloadTarget::Direct {
                model_id: 1,
                version_id: None,
            })
            .await
            .unwrap();
        assert_eq!(file.file_name, "model1.safetensors");
        assert_eq!(file.url, format!("{}/download/100", base));

        let staged = exec
            .transfer(&file, &dest, &CancellationToken::new())
            .await
            .unwrap();
        let busy = exec
            .transfer(&file, &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(busy.reason(), "destination-busy");

        exec.verify_and_commit(staged, file.expected_hash.as_ref())
            .await
            .unwrap();
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_cancel_discards_partial_file() {
        let base = spawn().await;
        let exec = executor(&base);
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model1.safetensors");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let file = exec
            .resolve(&DownloadTarget::Direct {
                model_id: 1,
                version_id: None,
            })
            .await
            .unwrap();
        let err = exec.transfer(&file, &dest, &cancel).await.unwrap_err();

        assert_eq!(err.reason(), "cancelled");
        assert!(!part_path(&dest).exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_with_cancelled_token_touches_nothing() {
        let exec = executor("http://127.0.0.1:9");
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("sub").join("model1.safetensors");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let target = DownloadTarget::Direct {
            model_id: 1,
            version_id: None,
        };
        let err = exec.download(&target, &dest, &cancel).await.unwrap_err();

        assert_eq!(err.reason(), "cancelled");
        assert!(!tmp.path().join("sub").exists());
    }
}
