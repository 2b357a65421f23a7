//! Optional on-disk log of every inference request and response.

use crate::error::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const LOG_DIR_NAME: &str = "inference_summary";
pub const ARCHIVE_NAME: &str = "inference_summary.tar.gz";

pub struct InferenceLog {
    dir: PathBuf,
    next: AtomicUsize,
}

impl InferenceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next: AtomicUsize::new(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one exchange as `NNN-<kind>.json`. Failures are only logged.
    pub fn record(&self, kind: &str, request: &Value, response: &Value) {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{:03}-{}.json", n, kind));
        let entry = json!({
            "kind": kind,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "request": request,
            "response": response,
        });

        let result = std::fs::create_dir_all(&self.dir).and_then(|_| {
            let bytes = serde_json::to_vec_pretty(&entry)?;
            std::fs::write(&path, bytes)
        });
        if let Err(e) = result {
            log::warn!("🟠 Warning: failed to write inference log {}: {}", path.display(), e);
        }
    }
}

/// Compress `log_dir` into `<downloads_dir>/inference_summary.tar.gz`.
/// Returns `None` when there is nothing to archive.
pub fn archive(log_dir: &Path, downloads_dir: &Path) -> Result<Option<PathBuf>> {
    if !log_dir.is_dir() {
        return Ok(None);
    }

    let archive_path = downloads_dir.join(ARCHIVE_NAME);
    let file = File::create(&archive_path)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append_dir_all(LOG_DIR_NAME, log_dir)?;
    builder.into_inner()?.finish()?;

    log::debug!("Archived inference log to {}", archive_path.display());
    Ok(Some(archive_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[test]
    fn test_records_are_numbered() {
        let tmp = tempfile::tempdir().unwrap();
        let log = InferenceLog::new(tmp.path().join(LOG_DIR_NAME));

        log.record("act", &json!({"q": 1}), &json!({"a": 1}));
        log.record("extract", &json!({"q": 2}), &json!({"a": 2}));

        assert!(log.dir().join("001-act.json").exists());
        let second: Value =
            serde_json::from_slice(&std::fs::read(log.dir().join("002-extract.json")).unwrap())
                .unwrap();
        assert_eq!(second["response"]["a"], 2);
    }

    #[test]
    fn test_archive_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let downloads = tmp.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        let log_dir = tmp.path().join(LOG_DIR_NAME);

        assert!(archive(&log_dir, &downloads).unwrap().is_none());

        InferenceLog::new(&log_dir).record("act", &json!({}), &json!({}));
        let path = archive(&log_dir, &downloads).unwrap().unwrap();

        let mut tar = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"inference_summary/001-act.json".to_string()));
    }
}
