//! Local model catalogue, downloads and on-disk storage
//!
//! Describes the supported models and acquires their assets.
//!
//! Module structure:
//! - types.rs: ModelDescriptor, Globs, DownloadProgress, DownloadTask
//! - registry.rs: LlmModel, the closed set of supported models
//! - downloader.rs: Resumable hub downloads with progress
//! - download_registry.rs: In-flight and finished downloads by destination
//! - tool_support.rs: Native tool template detection
//! - manager.rs: LlmModelManager, the models directory
//! - factory.rs: ModelFactory, descriptor to backend client

pub mod types;
pub mod registry;
pub mod downloader;
pub mod download_registry;
pub mod tool_support;
pub mod manager;
pub mod factory;

pub use types::{BackendKind, DownloadProgress, DownloadStatus, DownloadTask, Globs, LocalModelInfo, ModelDescriptor};
pub use registry::LlmModel;
pub use downloader::{DownloadSource, DownloaderConfig, FileDownloader};
pub use download_registry::DownloadRegistry;
pub use tool_support::{has_native_tool_support, has_native_tool_support_with_override, NATIVE_TOOL_MODELS};
pub use manager::LlmModelManager;
pub use factory::ModelFactory;
