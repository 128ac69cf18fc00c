//! Registry of in-flight and finished downloads, keyed by destination directory
//!
//! A second download into the same destination attaches to the running
//! transfer instead of starting another one.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use super::types::{DownloadProgress, DownloadStatus, DownloadTask};

enum Slot {
    InFlight(Arc<watch::Sender<DownloadTask>>),
    Finished(DownloadTask),
}

/// How a caller joined a transfer
pub enum Attach {
    /// Caller owns the transfer and must drive it
    Leader(TransferHandle),
    /// Another caller is transferring; follow its snapshots
    Follower(watch::Receiver<DownloadTask>),
}

#[derive(Clone, Default)]
pub struct DownloadRegistry {
    entries: Arc<DashMap<PathBuf, Slot>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer for `task.destination`, or attach to the one running
    pub fn begin(&self, task: DownloadTask) -> Attach {
        match self.entries.entry(task.destination.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Slot::InFlight(tx) = occupied.get() {
                    return Attach::Follower(tx.subscribe());
                }
                let (tx, _) = watch::channel(task.clone());
                let tx = Arc::new(tx);
                occupied.insert(Slot::InFlight(Arc::clone(&tx)));
                Attach::Leader(TransferHandle::new(self.clone(), task.destination, tx))
            }
            Entry::Vacant(vacant) => {
                let (tx, _) = watch::channel(task.clone());
                let tx = Arc::new(tx);
                vacant.insert(Slot::InFlight(Arc::clone(&tx)));
                Attach::Leader(TransferHandle::new(self.clone(), task.destination, tx))
            }
        }
    }

    /// Latest snapshot of the transfer into `destination`
    pub fn task(&self, destination: &Path) -> Option<DownloadTask> {
        self.entries.get(destination).map(|slot| match slot.value() {
            Slot::InFlight(tx) => tx.borrow().clone(),
            Slot::Finished(task) => task.clone(),
        })
    }

    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.entries
            .iter()
            .map(|slot| match slot.value() {
                Slot::InFlight(tx) => tx.borrow().clone(),
                Slot::Finished(task) => task.clone(),
            })
            .collect()
    }

    /// Drop a finished entry; in-flight transfers are left alone
    pub fn forget(&self, destination: &Path) -> bool {
        self.entries
            .remove_if(destination, |_, slot| matches!(slot, Slot::Finished(_)))
            .is_some()
    }

    fn finish(&self, destination: &Path, task: DownloadTask) {
        self.entries
            .insert(destination.to_path_buf(), Slot::Finished(task));
    }
}

/// Exclusive right to drive one transfer
///
/// Dropping an unfinished handle marks the transfer failed so followers and
/// later callers are not left waiting.
pub struct TransferHandle {
    registry: DownloadRegistry,
    destination: PathBuf,
    tx: Arc<watch::Sender<DownloadTask>>,
    finished: bool,
}

impl TransferHandle {
    fn new(registry: DownloadRegistry, destination: PathBuf, tx: Arc<watch::Sender<DownloadTask>>) -> Self {
        Self {
            registry,
            destination,
            tx,
            finished: false,
        }
    }

    pub fn update(&self, progress: &DownloadProgress) {
        self.tx.send_modify(|task| {
            task.status = progress.status.clone();
            task.fraction = task.fraction.max(progress.fraction).min(1.0);
            task.downloaded_bytes = progress.downloaded_bytes;
            task.total_bytes = progress.total_bytes;
        });
    }

    fn set_status(&self, status: DownloadStatus) {
        self.tx.send_modify(|task| {
            if status == DownloadStatus::Complete {
                task.fraction = 1.0;
            }
            task.status = status;
        });
    }

    pub fn finish(mut self, status: DownloadStatus) {
        self.complete(status);
    }

    fn complete(&mut self, status: DownloadStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.set_status(status);
        let task = self.tx.borrow().clone();
        self.registry.finish(&self.destination, task);
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!("Download into {:?} was interrupted", self.destination);
            self.complete(DownloadStatus::Failed("interrupted".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_engine::model_manager::types::Globs;

    fn task(dest: &str) -> DownloadTask {
        DownloadTask {
            repo_id: "org/repo".to_string(),
            globs: Globs::mlx(),
            destination: PathBuf::from(dest),
            status: DownloadStatus::Pending,
            fraction: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
        }
    }

    fn progress(fraction: f64) -> DownloadProgress {
        DownloadProgress {
            model_id: "org/repo".to_string(),
            downloaded_bytes: (fraction * 100.0) as u64,
            total_bytes: 100,
            fraction,
            status: DownloadStatus::Downloading,
        }
    }

    #[test]
    fn test_second_begin_follows() {
        let registry = DownloadRegistry::new();
        let leader = match registry.begin(task("/tmp/a")) {
            Attach::Leader(handle) => handle,
            Attach::Follower(_) => panic!("Expected leader"),
        };
        let mut follower = match registry.begin(task("/tmp/a")) {
            Attach::Follower(rx) => rx,
            Attach::Leader(_) => panic!("Expected follower"),
        };

        leader.update(&progress(0.5));
        assert_eq!(follower.borrow_and_update().fraction, 0.5);

        leader.finish(DownloadStatus::Complete);
        let snapshot = registry.task(Path::new("/tmp/a")).unwrap();
        assert_eq!(snapshot.status, DownloadStatus::Complete);
        assert_eq!(snapshot.fraction, 1.0);
    }

    #[test]
    fn test_fraction_never_regresses() {
        let registry = DownloadRegistry::new();
        let Attach::Leader(handle) = registry.begin(task("/tmp/b")) else {
            panic!("Expected leader");
        };
        handle.update(&progress(0.6));
        handle.update(&progress(0.2));
        assert_eq!(registry.task(Path::new("/tmp/b")).unwrap().fraction, 0.6);
    }

    #[test]
    fn test_dropped_handle_marks_failed_and_allows_restart() {
        let registry = DownloadRegistry::new();
        if let Attach::Leader(handle) = registry.begin(task("/tmp/c")) {
            drop(handle);
        }
        let snapshot = registry.task(Path::new("/tmp/c")).unwrap();
        assert!(matches!(snapshot.status, DownloadStatus::Failed(_)));

        let restarted = registry.begin(task("/tmp/c"));
        assert!(matches!(restarted, Attach::Leader(_)));
        assert!(!registry.forget(Path::new("/tmp/c")));
        assert_eq!(registry.tasks().len(), 1);

        drop(restarted);
        assert!(registry.forget(Path::new("/tmp/c")));
        assert!(registry.tasks().is_empty());
    }
}
