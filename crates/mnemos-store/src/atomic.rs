//! Crash-safe JSON writes with numbered backup rotation.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;

/// Find the next free backup index for `<stem>_bak_<N>.json` next to `path`.
///
/// Scans existing backups and returns one past the highest index, so backup
/// numbering is monotonic even across process restarts.
pub fn next_backup_index(path: &Path) -> u64 {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return 1;
    };
    let Some(dir) = path.parent() else {
        return 1;
    };
    let prefix = format!("{stem}_bak_");

    let mut highest = 0u64;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(rest) = name.strip_prefix(&prefix)
                && let Some(index) = rest.strip_suffix(".json")
                && let Ok(index) = index.parse::<u64>()
            {
                highest = highest.max(index);
            }
        }
    }
    highest + 1
}

/// Run `attempt`, retrying once on failure. The second failure surfaces.
fn with_retry(path: &Path, mut attempt: impl FnMut() -> std::io::Result<()>) -> std::io::Result<()> {
    if let Err(first) = attempt() {
        warn!(path = %path.display(), error = %first, "save failed, retrying once");
        return attempt();
    }
    Ok(())
}

fn backup_then_replace(path: &Path, serialized: &str) -> std::io::Result<()> {
    // Copy the previous version aside before overwriting it.
    if path.exists()
        && let (Some(stem), Some(dir)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.parent(),
        )
    {
        let index = next_backup_index(path);
        let backup = dir.join(format!("{stem}_bak_{index}.json"));
        std::fs::copy(path, &backup)?;
        debug!(backup = %backup.display(), "rotated snapshot backup");
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serialized)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize `value` and write it to `path` atomically, rotating the previous
/// version into a numbered backup first.
///
/// A transient I/O failure is retried once; the second failure surfaces, but
/// the previous snapshot is left intact thanks to temp-then-rename.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    with_retry(path, || backup_then_replace(path, &serialized))?;
    Ok(())
}

/// Serialize `value` and write it to `path` atomically without keeping a
/// backup of the previous version. Used for the full-turn log, which only
/// grows.
pub fn save_json_atomic_no_backup<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");

    with_retry(path, || {
        std::fs::write(&tmp, &serialized)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_save_creates_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");

        save_json_atomic(&path, &json!({"v": 1})).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("agent_memory_bak_1.json").exists());
    }

    #[test]
    fn test_backup_rotation_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");

        for v in 0..4 {
            save_json_atomic(&path, &json!({"v": v})).unwrap();
        }

        // Three overwrites, three backups: _bak_1 .. _bak_3.
        for n in 1..=3 {
            let backup = dir.path().join(format!("agent_memory_bak_{n}.json"));
            assert!(backup.exists(), "missing backup {n}");
        }
        // Backup N holds version N-1.
        let bak2: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("agent_memory_bak_2.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(bak2["v"], 1);
    }

    #[test]
    fn test_next_backup_index_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph_nodes.json");
        std::fs::write(dir.path().join("graph_nodes_bak_7.json"), "{}").unwrap();
        std::fs::write(dir.path().join("graph_nodes_bak_2.json"), "{}").unwrap();

        assert_eq!(next_backup_index(&path), 8);
    }

    #[test]
    fn test_transient_failure_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");

        let mut attempts = 0u32;
        let result = with_retry(&path, || {
            attempts += 1;
            if attempts == 1 {
                Err(std::io::Error::other("disk hiccup"))
            } else {
                std::fs::write(&path, "{}")
            }
        });

        assert!(result.is_ok());
        assert_eq!(attempts, 2);
        assert!(path.exists());
    }

    #[test]
    fn test_persistent_failure_surfaces_after_second_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");

        let mut attempts = 0u32;
        let result = with_retry(&path, || {
            attempts += 1;
            Err(std::io::Error::other("disk gone"))
        });

        assert!(result.is_err());
        // Exactly one retry, never more.
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");
        save_json_atomic(&path, &json!({"v": 1})).unwrap();

        assert!(!dir.path().join("agent_memory.json.tmp").exists());
    }
}
