//! On-disk model store: one directory per repository under `models_dir`

use std::path::{Path, PathBuf};

use crate::llm_engine::provider::LlmError;
use super::download_registry::DownloadRegistry;
use super::downloader::{DownloadSource, DownloaderConfig, FileDownloader, METADATA_FILE};
use super::types::{LocalModelInfo, ModelDescriptor};

/// Owns the models directory and every download into it
pub struct LlmModelManager {
    /// Directory where models are stored, one subdirectory per repository
    models_dir: PathBuf,
    config: DownloaderConfig,
    registry: DownloadRegistry,
}

impl LlmModelManager {
    pub fn new(models_dir: PathBuf) -> Self {
        Self::with_config(models_dir, DownloaderConfig::default())
    }

    pub fn with_config(models_dir: PathBuf, config: DownloaderConfig) -> Self {
        if let Err(e) = std::fs::create_dir_all(&models_dir) {
            log::warn!("Cannot create {}: {}", models_dir.display(), e);
        }

        Self {
            models_dir,
            config,
            registry: DownloadRegistry::new(),
        }
    }

    /// `<data dir>/local-llm-session/models`
    pub fn default_models_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("local-llm-session")
            .join("models")
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn registry(&self) -> &DownloadRegistry {
        &self.registry
    }

    pub fn downloader_config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Where a repository's files live
    pub fn repo_dir(&self, repo_id: &str) -> PathBuf {
        repo_id
            .split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.models_dir.clone(), |dir, part| dir.join(part))
    }

    /// Downloader for a descriptor's remote assets; None when it needs none
    pub fn downloader_for(&self, descriptor: &ModelDescriptor) -> Option<FileDownloader> {
        let id = descriptor.remote_id()?;
        let globs = descriptor.globs()?;
        Some(FileDownloader::new(
            DownloadSource::HuggingFace {
                id: id.to_string(),
                globs,
            },
            self.repo_dir(id),
            self.config.clone(),
            self.registry.clone(),
        ))
    }

    /// Get detailed info about every completed local download
    pub fn local_models(&self) -> Result<Vec<LocalModelInfo>, LlmError> {
        let mut models = Vec::new();

        if !self.models_dir.exists() {
            return Ok(models);
        }

        // Repositories are laid out as <owner>/<name>
        for owner in read_dirs(&self.models_dir)? {
            for repo in read_dirs(&owner)? {
                if !repo.join(METADATA_FILE).exists() {
                    continue;
                }
                let id = match repo.strip_prefix(&self.models_dir) {
                    Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                    Err(_) => continue,
                };

                let mut files = Vec::new();
                let mut size_bytes = 0;
                for entry in std::fs::read_dir(&repo).into_iter().flatten().flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name.starts_with('.') || name.ends_with(".part") {
                        continue;
                    }
                    size_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                    files.push(name);
                }
                files.sort();

                models.push(LocalModelInfo {
                    id,
                    path: repo,
                    size_bytes,
                    files,
                });
            }
        }

        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    /// Delete a downloaded model, including partial files
    pub fn delete_model(&self, repo_id: &str) -> Result<(), LlmError> {
        let path = self.repo_dir(repo_id);
        if let Some(task) = self.registry.task(&path) {
            if !task.status.is_finished() {
                return Err(LlmError::InvalidRequest(format!(
                    "{} is still downloading",
                    repo_id
                )));
            }
        }
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .map_err(|e| LlmError::Other(format!("Failed to remove {}: {}", path.display(), e)))?;
            log::info!("Deleted model {}", repo_id);
        }
        self.registry.forget(&path);
        Ok(())
    }
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>, LlmError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LlmError::Other(format!("Failed to list {}: {}", dir.display(), e)))?;
    Ok(entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}
