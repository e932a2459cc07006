use crate::core::scheduler::{StageState, StageStatus};
use crate::core::sync::MessageQueue;
use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Spawns the stage removing segments that left the time-shift window.
pub(crate) fn retention_init(
    deletions: Arc<MessageQueue<PathBuf>>,
    status: StageStatus,
) -> std::io::Result<JoinHandle<crate::error::Result<()>>> {
    std::thread::Builder::new()
        .name("retention".to_string())
        .spawn(move || {
            status.set(StageState::Running);
            let mut removed = 0usize;
            loop {
                let Some(path) = deletions.get() else {
                    if deletions.is_closed() {
                        break;
                    }
                    continue;
                };
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("removed expired segment {}", path.display());
                        removed += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!("expired segment {} already gone", path.display());
                    }
                    Err(e) => warn!("cannot remove expired segment {}: {e}", path.display()),
                }
            }
            info!("retention finished: {removed} segments removed");
            status.set(StageState::Stopped);
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_removes_requested_files() {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempfile::tempdir().unwrap();
        let expired = dir.path().join("v_0.m4s");
        let kept = dir.path().join("v_1.m4s");
        fs::write(&expired, b"old").unwrap();
        fs::write(&kept, b"new").unwrap();

        let deletions = Arc::new(MessageQueue::new());
        let status = StageStatus::new();
        let handle = retention_init(deletions.clone(), status.clone()).unwrap();

        deletions.put(expired.clone());
        // Missing files are not an error.
        deletions.put(dir.path().join("v_9.m4s"));
        deletions.close();
        handle.join().unwrap().unwrap();

        assert!(!expired.exists());
        assert!(kept.exists());
        assert_eq!(status.get(), StageState::Stopped);
    }
}
