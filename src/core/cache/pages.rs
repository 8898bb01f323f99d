// src/core/cache/pages.rs

//! On-disk page bodies under a hash-sharded directory tree. A page for hash
//! `H = s1 || s2 || s3 || s4` lives at `<root>/s1/s2/s3/s4/H`.

use crate::core::cache::PageHash;
use crate::core::errors::ProxyError;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;

#[cfg(unix)]
const DIR_MODE: u32 = 0o770;

/// One leaf file found by a store walk.
#[derive(Debug, Clone)]
pub struct PageFile {
    pub hash: String,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: SystemTime,
}

/// The filesystem half of the cache. Thread-safe per-file via OS semantics;
/// different hashes never contend.
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The full path of the page file for `hash`.
    pub fn page_path(&self, hash: &PageHash) -> PathBuf {
        let mut path = self.root.clone();
        for shard in hash.shards() {
            path.push(shard);
        }
        path.push(hash.as_str());
        path
    }

    /// Creates the shard directories and writes the page in one shot. On any
    /// error a partial file may remain; the evictor reconciles it later.
    pub async fn write_page(&self, hash: &PageHash, bytes: &[u8]) -> Result<(), ProxyError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut dir = self.root.clone();
        for shard in hash.shards() {
            dir.push(shard);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(DIR_MODE))
                            .await?;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut file = tokio::fs::File::create(dir.join(hash.as_str())).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads the page bytes for `hash`, or `ProxyError::Miss`.
    pub async fn read_page(&self, hash: &PageHash) -> Result<Vec<u8>, ProxyError> {
        match tokio::fs::read(self.page_path(hash)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ProxyError::Miss),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the page file and opportunistically prunes emptied shard
    /// directories. A missing file is not an error.
    pub async fn delete_page(&self, hash: &PageHash) -> Result<(), ProxyError> {
        let path = self.page_path(hash);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == self.root || tokio::fs::remove_dir(&d).await.is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    /// Walks the whole tree and returns every leaf file. Files whose name is
    /// not a well-formed hash are returned too, so the caller can reconcile
    /// them away.
    pub async fn walk(&self) -> Result<Vec<PageFile>, ProxyError> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    stack.push(entry.path());
                } else {
                    let hash = entry.file_name().to_string_lossy().into_owned();
                    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    files.push(PageFile {
                        hash,
                        path: entry.path(),
                        size: meta.len(),
                        mtime,
                    });
                }
            }
        }
        Ok(files)
    }
}
