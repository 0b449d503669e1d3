//! Local POSIX environment (spec.md §4.4): passthrough to the host
//! filesystem for non-data files and for the local cache directory.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Ordinary local-filesystem operations, unmediated by object-store or
/// stream classification. `VirtualEnv` dispatches here for anything
/// classified `Other`, and `Data`/`Log` use it for their local cache copy.
pub struct PosixEnv {
    root: PathBuf,
}

impl PosixEnv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PosixEnv { root: root.into() }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub async fn write_file(&self, relative: &str, contents: &[u8]) -> Result<()> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    pub async fn append_file(&self, relative: &str, contents: &[u8]) -> Result<()> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(contents).await?;
        Ok(())
    }

    pub async fn read_file(&self, relative: &str) -> Result<Vec<u8>> {
        let mut file = fs::File::open(self.path(relative)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_range(&self, relative: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        use tokio::io::AsyncSeekExt;
        let mut file = fs::File::open(self.path(relative)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn exists(&self, relative: &str) -> bool {
        fs::metadata(self.path(relative)).await.is_ok()
    }

    pub async fn size(&self, relative: &str) -> Result<u64> {
        Ok(fs::metadata(self.path(relative)).await?.len())
    }

    pub async fn mtime(&self, relative: &str) -> Result<chrono::DateTime<chrono::Utc>> {
        let modified = fs::metadata(self.path(relative)).await?.modified()?;
        Ok(chrono::DateTime::<chrono::Utc>::from(modified))
    }

    pub async fn delete(&self, relative: &str) -> Result<()> {
        match fs::remove_file(self.path(relative)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Renaming non-data/non-log files is always permitted locally
    /// (spec.md §4.4).
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to_path = self.path(to);
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.path(from), to_path).await?;
        Ok(())
    }

    pub async fn list_children(&self, relative_dir: &str) -> Result<Vec<String>> {
        let dir = self.path(relative_dir);
        if !Path::new(&dir).exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    pub async fn mkdir_all(&self, relative: &str) -> Result<()> {
        fs::create_dir_all(self.path(relative)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let env = PosixEnv::new(dir.path());
        env.write_file("a.txt", b"hello").await.unwrap();
        assert_eq!(env.read_file("a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let env = PosixEnv::new(dir.path());
        env.delete("missing.txt").await.unwrap();
    }

    #[tokio::test]
    async fn list_children_reflects_directory_contents() {
        let dir = tempfile::tempdir().unwrap();
        let env = PosixEnv::new(dir.path());
        env.write_file("a.txt", b"x").await.unwrap();
        env.write_file("b.txt", b"y").await.unwrap();
        let mut names = env.list_children("").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }
}
