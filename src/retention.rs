//! Age-based cleanup of the persistence directory.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Extensions produced by the incident writers.
const ARTIFACT_EXTENSIONS: [&str; 2] = ["avi", "mp4"];

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: Vec<PathBuf>,
    pub failed: usize,
}

/// Delete artifacts in `dir` whose mtime is older than `max_age`.
pub fn sweep(dir: &Path, max_age: Duration) -> Result<SweepReport> {
    sweep_at(dir, max_age, SystemTime::now())
}

/// `sweep` against an explicit clock.
pub fn sweep_at(dir: &Path, max_age: Duration, now: SystemTime) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    if !dir.exists() {
        return Ok(report);
    }
    let Some(cutoff) = now.checked_sub(max_age) else {
        return Ok(report);
    };

    let entries = fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if !is_artifact(&path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("retention: cannot stat {}: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };
        report.scanned += 1;

        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("retention: deleted {}", path.display());
                report.removed.push(path);
            }
            Err(e) => {
                log::warn!("retention: failed to delete {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

fn is_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ARTIFACT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_only_expired_artifacts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["a.avi", "b.MP4", "notes.txt", "c.avi.partial"] {
            fs::write(dir.path().join(name), b"x")?;
        }

        let fresh = sweep(dir.path(), Duration::from_secs(3600))?;
        assert!(fresh.removed.is_empty());
        assert_eq!(fresh.scanned, 2);

        let later = SystemTime::now() + Duration::from_secs(7200);
        let report = sweep_at(dir.path(), Duration::from_secs(3600), later)?;
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.failed, 0);

        let mut left: Vec<String> = fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["c.avi.partial", "notes.txt"]);
        Ok(())
    }

    #[test]
    fn missing_directory_is_empty() -> Result<()> {
        let report = sweep(Path::new("/nonexistent/incident-recorder"), Duration::from_secs(1))?;
        assert_eq!(report, SweepReport::default());
        Ok(())
    }
}
