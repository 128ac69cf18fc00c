//! Resumable model downloads from a HuggingFace-compatible hub
//!
//! Files matching the source globs are streamed into `<file>.part`, resumed
//! with a `Range` request when a partial file exists, and renamed into place
//! once their size checks out. A metadata file records the completed set so
//! later presence checks need no network.

use futures_util::StreamExt;
use globset::{Glob, GlobSet, GlobSetBuilder};
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use crate::llm_engine::provider::LlmError;
use super::download_registry::{Attach, DownloadRegistry, TransferHandle};
use super::types::{DownloadProgress, DownloadStatus, DownloadTask, Globs};

/// Name of the completion record inside a destination directory
pub const METADATA_FILE: &str = ".download-meta.json";

const PART_SUFFIX: &str = ".part";

/// Highest fraction reported before every file is published
const IN_FLIGHT_CEILING: f64 = 0.999;

/// Progress callback; may be called from a background task
pub type ProgressFn = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DownloadSource {
    HuggingFace { id: String, globs: Globs },
}

impl DownloadSource {
    pub fn id(&self) -> &str {
        match self {
            DownloadSource::HuggingFace { id, .. } => id,
        }
    }

    pub fn globs(&self) -> &Globs {
        match self {
            DownloadSource::HuggingFace { globs, .. } => globs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    pub hub_url: String,
    pub revision: String,
    pub timeout_secs: u64,
    pub progress_interval: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            hub_url: "https://huggingface.co".to_string(),
            revision: "main".to_string(),
            timeout_secs: 3600, // 1 hour for large models
            progress_interval: Duration::from_millis(100),
        }
    }
}

/// One remote file selected for download
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteFile {
    pub path: String,
    pub size: u64,
}

/// Completion record shared by every source downloading into one directory
#[derive(Debug, Serialize, Deserialize)]
struct DownloadMetadata {
    repo_id: String,
    revision: String,
    /// Patterns of every download that completed here
    #[serde(default)]
    globs: Vec<String>,
    files: Vec<RemoteFile>,
}

impl DownloadMetadata {
    /// Fold a newly completed download into this record
    fn merge(&mut self, globs: &Globs, files: Vec<RemoteFile>) {
        for pattern in globs.patterns() {
            if !self.globs.contains(pattern) {
                self.globs.push(pattern.clone());
            }
        }
        for file in files {
            match self.files.iter_mut().find(|f| f.path == file.path) {
                Some(recorded) => *recorded = file,
                None => self.files.push(file),
            }
        }
    }
}

/// Whether a hub-supplied path stays inside the destination directory
fn is_contained(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
}

pub struct FileDownloader {
    source: DownloadSource,
    destination: PathBuf,
    config: DownloaderConfig,
    registry: DownloadRegistry,
}

impl FileDownloader {
    pub fn new(
        source: DownloadSource,
        destination: PathBuf,
        config: DownloaderConfig,
        registry: DownloadRegistry,
    ) -> Self {
        Self {
            source,
            destination,
            config,
            registry,
        }
    }

    pub fn source(&self) -> &DownloadSource {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Whether every pattern of this source is satisfied by a recorded, intact
    /// file. Other sources sharing the destination do not count.
    pub fn is_downloaded(&self) -> bool {
        let Some(meta) = self.read_metadata() else {
            return false;
        };
        if meta.repo_id != self.source.id() {
            return false;
        }
        let Ok(matcher) = build_glob_set(self.source.globs()) else {
            return false;
        };

        let mut satisfied = vec![false; self.source.globs().patterns().len()];
        for file in &meta.files {
            let hits = matcher.matches(&file.path);
            if hits.is_empty() {
                continue;
            }
            if !self.is_intact(file) {
                return false;
            }
            for hit in hits {
                satisfied[hit] = true;
            }
        }
        !satisfied.is_empty() && satisfied.iter().all(|s| *s)
    }

    fn is_intact(&self, file: &RemoteFile) -> bool {
        is_contained(&file.path)
            && std::fs::metadata(self.destination.join(&file.path))
                .map(|m| m.is_file() && m.len() == file.size)
                .unwrap_or(false)
    }

    /// Recorded files that belong to this source
    pub fn downloaded_files(&self) -> Vec<RemoteFile> {
        let Some(meta) = self.read_metadata() else {
            return Vec::new();
        };
        match build_glob_set(self.source.globs()) {
            Ok(matcher) => meta
                .files
                .into_iter()
                .filter(|f| matcher.is_match(&f.path))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Forget the completion record so the next download re-checks the hub
    pub fn remove_metadata(&self) -> Result<(), LlmError> {
        let path = self.destination.join(METADATA_FILE);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| LlmError::Other(format!("Failed to remove metadata: {}", e)))?;
        }
        Ok(())
    }

    fn read_metadata(&self) -> Option<DownloadMetadata> {
        let bytes = std::fs::read(self.destination.join(METADATA_FILE)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Download every matching file, reporting a combined fraction in [0, 1]
    ///
    /// The final report is exactly 1.0. A concurrent call for the same
    /// destination follows the running transfer.
    pub async fn download<F>(&self, on_progress: F) -> Result<(), LlmError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.download_with_progress(move |p| on_progress(p.fraction))
            .await
    }

    /// Like `download`, with byte counts and status in every report
    pub async fn download_with_progress<F>(&self, on_progress: F) -> Result<(), LlmError>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        let on_progress = monotonic(Arc::new(on_progress));
        let task = DownloadTask {
            repo_id: self.source.id().to_string(),
            globs: self.source.globs().clone(),
            destination: self.destination.clone(),
            status: DownloadStatus::Pending,
            fraction: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
        };

        loop {
            if self.is_downloaded() {
                log::debug!("{} already downloaded", self.source.id());
                let total = self.downloaded_files().iter().map(|f| f.size).sum();
                on_progress(DownloadProgress {
                    downloaded_bytes: total,
                    total_bytes: total,
                    fraction: 1.0,
                    status: DownloadStatus::Complete,
                    ..task.progress()
                });
                return Ok(());
            }

            let handle = match self.registry.begin(task.clone()) {
                Attach::Leader(handle) => handle,
                Attach::Follower(rx) => {
                    log::info!("Attaching to running download into {:?}", self.destination);
                    follow(rx, Arc::clone(&on_progress)).await?;
                    // The transfer may have been for other files in this directory
                    continue;
                }
            };

            let mut reporter = ProgressReporter::new(
                Arc::clone(&on_progress),
                self.config.progress_interval,
                task.repo_id.clone(),
            );
            return match self.transfer(&handle, &mut reporter).await {
                Ok(()) => {
                    handle.finish(DownloadStatus::Complete);
                    reporter.complete();
                    log::info!("Downloaded {} into {:?}", self.source.id(), self.destination);
                    Ok(())
                }
                Err(e) => {
                    log::error!("Download of {} failed: {}", self.source.id(), e);
                    handle.finish(DownloadStatus::Failed(e.to_string()));
                    Err(e)
                }
            };
        }
    }

    async fn transfer(
        &self,
        handle: &TransferHandle,
        reporter: &mut ProgressReporter,
    ) -> Result<(), LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| LlmError::TransferFailed(format!("Failed to build HTTP client: {}", e)))?;

        let files = self.list_files(&client).await?;
        let total: u64 = files.iter().map(|f| f.size).sum();
        log::info!(
            "Downloading {} file(s), {} bytes, from {}",
            files.len(),
            total,
            self.source.id()
        );

        tokio::fs::create_dir_all(&self.destination)
            .await
            .map_err(|e| LlmError::Other(format!("Failed to create destination: {}", e)))?;

        let mut done: u64 = 0;
        reporter.report(handle, done, total, true);

        for file in &files {
            let target = self.destination.join(&file.path);
            let present = tokio::fs::metadata(&target)
                .await
                .map(|m| m.len() == file.size)
                .unwrap_or(false);
            if present {
                done += file.size;
                reporter.report(handle, done, total, false);
                continue;
            }
            self.fetch_file(&client, file, &target, done, total, handle, reporter)
                .await?;
            done += file.size;
            reporter.report(handle, done, total, true);
        }

        handle.update(&reporter.snapshot(DownloadStatus::Verifying));
        self.write_metadata(files).await
    }

    async fn list_files(&self, client: &reqwest::Client) -> Result<Vec<RemoteFile>, LlmError> {
        let id = self.source.id();
        let url = format!(
            "{}/api/models/{}/tree/{}?recursive=true",
            self.config.hub_url.trim_end_matches('/'),
            id,
            self.config.revision
        );

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| LlmError::TransferFailed(format!("Failed to list {}: {}", id, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LlmError::AssetNotFound(format!("Repository {} not found", id)));
        }
        if !response.status().is_success() {
            return Err(LlmError::TransferFailed(format!(
                "Listing {} failed with status: {}",
                id,
                response.status()
            )));
        }

        let entries: Vec<TreeEntry> = response
            .json()
            .await
            .map_err(|e| LlmError::TransferFailed(format!("Invalid listing for {}: {}", id, e)))?;

        let matcher = build_glob_set(self.source.globs())?;
        let files: Vec<RemoteFile> = entries
            .into_iter()
            .filter(|e| e.kind == "file")
            .filter(|e| {
                let contained = is_contained(&e.path);
                if !contained {
                    log::warn!("Skipping {} entry outside the repository: {}", id, e.path);
                }
                contained
            })
            .filter(|e| matcher.is_match(&e.path))
            .map(|e| RemoteFile {
                path: e.path,
                size: e.size.unwrap_or(0),
            })
            .collect();

        if files.is_empty() {
            return Err(LlmError::AssetNotFound(format!(
                "No files in {} match {:?}",
                id,
                self.source.globs().patterns()
            )));
        }
        Ok(files)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_file(
        &self,
        client: &reqwest::Client,
        file: &RemoteFile,
        target: &Path,
        done_before: u64,
        total: u64,
        handle: &TransferHandle,
        reporter: &mut ProgressReporter,
    ) -> Result<(), LlmError> {
        let part_path = part_path(target);
        if let Some(parent) = part_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LlmError::Other(format!("Failed to create directory: {}", e)))?;
        }

        let existing = tokio::fs::metadata(&part_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let url = format!(
            "{}/{}/resolve/{}/{}",
            self.config.hub_url.trim_end_matches('/'),
            self.source.id(),
            self.config.revision,
            file.path
        );

        let mut request = client.get(&url);
        if existing > 0 {
            log::info!("Resuming {} from byte {}", file.path, existing);
            request = request.header(header::RANGE, format!("bytes={}-", existing));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::TransferFailed(format!("Failed to fetch {}: {}", file.path, e)))?;

        let status = response.status();
        let mut written = match status {
            StatusCode::PARTIAL_CONTENT if existing > 0 => existing,
            StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 && existing == file.size => {
                return publish(&part_path, target, file).await;
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // Partial file is larger than the remote one
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(LlmError::TransferFailed(format!(
                    "Partial download of {} is inconsistent with the remote file",
                    file.path
                )));
            }
            s if s.is_success() => 0,
            s => {
                return Err(LlmError::TransferFailed(format!(
                    "Download of {} failed with status: {}",
                    file.path, s
                )));
            }
        };

        let mut out = if written > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&part_path)
                .await
        } else {
            tokio::fs::File::create(&part_path).await
        }
        .map_err(|e| LlmError::Other(format!("Failed to open {}: {}", part_path.display(), e)))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| LlmError::TransferFailed(format!("Download error: {}", e)))?;
            out.write_all(&chunk)
                .await
                .map_err(|e| LlmError::Other(format!("Failed to append to {}: {}", part_path.display(), e)))?;
            written += chunk.len() as u64;
            reporter.report(handle, done_before + written.min(file.size), total, false);
        }

        out.flush()
            .await
            .map_err(|e| LlmError::Other(format!("Failed to flush {}: {}", part_path.display(), e)))?;
        out.sync_all()
            .await
            .map_err(|e| LlmError::Other(format!("Failed to sync {}: {}", part_path.display(), e)))?;
        drop(out);

        publish(&part_path, target, file).await
    }

    async fn write_metadata(&self, files: Vec<RemoteFile>) -> Result<(), LlmError> {
        let mut meta = self
            .read_metadata()
            .filter(|m| m.repo_id == self.source.id() && m.revision == self.config.revision)
            .unwrap_or_else(|| DownloadMetadata {
                repo_id: self.source.id().to_string(),
                revision: self.config.revision.clone(),
                globs: Vec::new(),
                files: Vec::new(),
            });
        meta.merge(self.source.globs(), files);
        let bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| LlmError::Other(format!("Failed to encode metadata: {}", e)))?;

        let path = self.destination.join(METADATA_FILE);
        let tmp = self.destination.join(format!("{}.tmp", METADATA_FILE));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| LlmError::Other(format!("Failed to write metadata: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| LlmError::Other(format!("Failed to publish metadata: {}", e)))
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Size-check a finished `.part` file and rename it into place
async fn publish(part_path: &Path, target: &Path, file: &RemoteFile) -> Result<(), LlmError> {
    let len = tokio::fs::metadata(part_path)
        .await
        .map(|m| m.len())
        .map_err(|e| LlmError::Other(format!("Failed to stat {}: {}", part_path.display(), e)))?;

    if len != file.size {
        if len > file.size {
            let _ = tokio::fs::remove_file(part_path).await;
        }
        return Err(LlmError::TransferFailed(format!(
            "{} is {} bytes, expected {}",
            file.path, len, file.size
        )));
    }

    tokio::fs::rename(part_path, target)
        .await
        .map_err(|e| LlmError::Other(format!("Failed to rename temp file: {}", e)))
}

fn build_glob_set(globs: &Globs) -> Result<GlobSet, LlmError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in globs.patterns() {
        let glob = Glob::new(pattern)
            .map_err(|e| LlmError::Configuration(format!("Invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| LlmError::Configuration(format!("Invalid glob set: {}", e)))
}

/// Drop reports that would move the fraction backwards
///
/// A follower that has to start its own transfer afterwards reports from zero
/// again; its caller only sees progress past what it was already shown.
fn monotonic(callback: ProgressFn) -> ProgressFn {
    let shown = std::sync::Mutex::new(f64::NEG_INFINITY);
    Arc::new(move |progress: DownloadProgress| {
        let mut shown = shown.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if progress.fraction > *shown {
            *shown = progress.fraction;
            callback(progress);
        }
    })
}

/// Relay a running transfer's snapshots until it finishes; the caller
/// reports completion once it has checked its own files
async fn follow(
    mut rx: tokio::sync::watch::Receiver<DownloadTask>,
    on_progress: ProgressFn,
) -> Result<(), LlmError> {
    let mut closed = false;
    loop {
        let task = rx.borrow_and_update().clone();
        match task.status {
            DownloadStatus::Complete => return Ok(()),
            DownloadStatus::Failed(msg) => return Err(LlmError::TransferFailed(msg)),
            _ if closed => {
                return Err(LlmError::TransferFailed("Download was interrupted".to_string()));
            }
            _ => on_progress(DownloadProgress {
                fraction: task.fraction.min(IN_FLIGHT_CEILING),
                ..task.progress()
            }),
        }
        // The sender goes away once the leader finished; read the final state
        closed = rx.changed().await.is_err();
    }
}

/// Throttled, monotonic progress relay
struct ProgressReporter {
    callback: ProgressFn,
    interval: Duration,
    model_id: String,
    last_emit: Option<Instant>,
    last: f64,
    done: u64,
    total: u64,
}

impl ProgressReporter {
    fn new(callback: ProgressFn, interval: Duration, model_id: String) -> Self {
        Self {
            callback,
            interval,
            model_id,
            last_emit: None,
            last: 0.0,
            done: 0,
            total: 0,
        }
    }

    fn snapshot(&self, status: DownloadStatus) -> DownloadProgress {
        DownloadProgress {
            model_id: self.model_id.clone(),
            downloaded_bytes: self.done,
            total_bytes: self.total,
            fraction: self.last,
            status,
        }
    }

    fn report(&mut self, handle: &TransferHandle, done: u64, total: u64, force: bool) {
        self.done = done;
        self.total = total;
        let fraction = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64).min(IN_FLIGHT_CEILING)
        };
        if fraction <= self.last && self.last_emit.is_some() {
            return;
        }
        let due = self
            .last_emit
            .map(|at| at.elapsed() >= self.interval)
            .unwrap_or(true);
        if !(due || force) {
            return;
        }
        self.last = self.last.max(fraction);
        self.last_emit = Some(Instant::now());
        let progress = self.snapshot(DownloadStatus::Downloading);
        handle.update(&progress);
        (self.callback)(progress);
    }

    fn complete(&mut self) {
        self.last = 1.0;
        self.done = self.total;
        (self.callback)(self.snapshot(DownloadStatus::Complete));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn downloader(dest: &Path) -> FileDownloader {
        FileDownloader::new(
            DownloadSource::HuggingFace {
                id: "org/repo".to_string(),
                globs: Globs::files(["model.gguf"]),
            },
            dest.to_path_buf(),
            DownloaderConfig::default(),
            DownloadRegistry::new(),
        )
    }

    #[test]
    fn test_glob_set_matches_nested_paths() {
        let set = build_glob_set(&Globs::mlx()).unwrap();
        assert!(set.is_match("model.safetensors"));
        assert!(set.is_match("config.json"));
        assert!(set.is_match("sub/tokenizer.json"));
        assert!(!set.is_match("README.md"));
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/m/model.gguf")),
            PathBuf::from("/m/model.gguf.part")
        );
    }

    #[test]
    fn test_is_downloaded_checks_recorded_sizes() {
        let dir = tempdir().unwrap();
        let d = downloader(dir.path());
        assert!(!d.is_downloaded());

        std::fs::write(dir.path().join("model.gguf"), b"abcd").unwrap();
        let meta = DownloadMetadata {
            repo_id: "org/repo".to_string(),
            revision: "main".to_string(),
            globs: vec!["model.gguf".to_string()],
            files: vec![RemoteFile {
                path: "model.gguf".to_string(),
                size: 4,
            }],
        };
        std::fs::write(
            dir.path().join(METADATA_FILE),
            serde_json::to_vec(&meta).unwrap(),
        )
        .unwrap();
        assert!(d.is_downloaded());

        std::fs::write(dir.path().join("model.gguf"), b"ab").unwrap();
        assert!(!d.is_downloaded());

        d.remove_metadata().unwrap();
        assert!(d.downloaded_files().is_empty());
    }

    fn record(dir: &Path, files: &[(&str, &[u8])]) {
        let meta = DownloadMetadata {
            repo_id: "org/repo".to_string(),
            revision: "main".to_string(),
            globs: files.iter().map(|(p, _)| p.to_string()).collect(),
            files: files
                .iter()
                .map(|(path, bytes)| {
                    std::fs::write(dir.join(path), bytes).unwrap();
                    RemoteFile {
                        path: path.to_string(),
                        size: bytes.len() as u64,
                    }
                })
                .collect(),
        };
        std::fs::write(dir.join(METADATA_FILE), serde_json::to_vec(&meta).unwrap()).unwrap();
    }

    #[test]
    fn test_other_file_in_shared_destination_does_not_count() {
        let dir = tempdir().unwrap();
        record(dir.path(), &[("q4.gguf", b"q4q4")]);

        let q8 = FileDownloader::new(
            DownloadSource::HuggingFace {
                id: "org/repo".to_string(),
                globs: Globs::files(["q8.gguf"]),
            },
            dir.path().to_path_buf(),
            DownloaderConfig::default(),
            DownloadRegistry::new(),
        );
        assert!(!q8.is_downloaded());
        assert!(q8.downloaded_files().is_empty());
        assert!(!downloader(dir.path()).is_downloaded());
    }

    #[test]
    fn test_every_pattern_needs_a_file() {
        let dir = tempdir().unwrap();
        record(dir.path(), &[("model.safetensors", b"w")]);

        let mlx = FileDownloader::new(
            DownloadSource::HuggingFace {
                id: "org/repo".to_string(),
                globs: Globs::mlx(),
            },
            dir.path().to_path_buf(),
            DownloaderConfig::default(),
            DownloadRegistry::new(),
        );
        assert!(!mlx.is_downloaded());

        record(dir.path(), &[("model.safetensors", b"w"), ("config.json", b"{}")]);
        assert!(mlx.is_downloaded());
    }

    #[test]
    fn test_merge_keeps_earlier_downloads() {
        let mut meta = DownloadMetadata {
            repo_id: "org/repo".to_string(),
            revision: "main".to_string(),
            globs: vec!["q4.gguf".to_string()],
            files: vec![RemoteFile {
                path: "q4.gguf".to_string(),
                size: 4,
            }],
        };
        meta.merge(
            &Globs::files(["q8.gguf", "q4.gguf"]),
            vec![
                RemoteFile {
                    path: "q8.gguf".to_string(),
                    size: 8,
                },
                RemoteFile {
                    path: "q4.gguf".to_string(),
                    size: 5,
                },
            ],
        );
        assert_eq!(meta.globs, vec!["q4.gguf", "q8.gguf"]);
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.files[0].size, 5);
        assert_eq!(meta.files[1].path, "q8.gguf");
    }

    #[test]
    fn test_hub_paths_must_stay_inside_destination() {
        assert!(is_contained("model.gguf"));
        assert!(is_contained("sub/tokenizer.json"));
        assert!(!is_contained("../x.json"));
        assert!(!is_contained("sub/../../x.json"));
        assert!(!is_contained("/abs/x.json"));
        assert!(!is_contained("./x.json"));
        assert!(!is_contained(""));
    }
}
