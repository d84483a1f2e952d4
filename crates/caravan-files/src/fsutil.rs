//! Filesystem helpers shared by the manifest writer and state stores.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::error;

/// Atomically write `content` to `path` via a temporary sibling and rename.
///
/// A crash mid-write leaves either the previous file or nothing at the
/// target, never a truncated mix. Parent directories are created if absent.
/// On rename failure the temporary file is removed.
///
/// Note: `rename()` is atomic on ext4, APFS, NTFS, and all mainstream
/// filesystems when source and destination share a mount.
pub async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_sibling(path);
    fs::write(&tmp, content).await?;

    if let Err(e) = fs::rename(&tmp, path).await {
        error!(
            from = %tmp.display(),
            to = %path.display(),
            "atomic write rename failed: {e}"
        );
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }

    Ok(())
}

/// Append `.tmp` to the full file name (not the extension), so
/// `acme.zip.manifest` becomes `acme.zip.manifest.tmp`.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        atomic_write(&path, b"hello").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_atomic_write_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        atomic_write(&path, b"first").await.unwrap();
        atomic_write(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme.zip.manifest");

        atomic_write(&path, b"data").await.unwrap();
        assert!(!dir.path().join("acme.zip.manifest.tmp").exists());
    }

    #[tokio::test]
    async fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/state.json");

        atomic_write(&path, b"nested").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "nested");
    }
}
