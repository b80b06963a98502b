use std::{borrow::Borrow, error::Error, fmt::Debug, hash::Hash, io, path::Path};

use async_trait::async_trait;
use derive_more::Constructor;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
}

/// A single entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Constructor)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
    type Path: Borrow<Self::PathRef> + Clone + Send + Sync + Debug + Eq + Hash;
    type PathRef: ?Sized + Send + Sync + Debug + Eq + Hash;
    type Error: Error + Send + Sync + 'static;

    /// Lists the entries of `path` in no particular order.
    async fn read_dir(&self, path: &Self::PathRef) -> Result<Vec<DirEntry>, Self::Error>;
    async fn exists(&self, path: &Self::PathRef) -> Result<bool, Self::Error>;
    /// Absolute form of `path` with `..` and symlinks resolved.
    async fn canonicalize(&self, path: &Self::PathRef) -> Result<Self::Path, Self::Error>;

    fn file_path(&self, directory: &Self::PathRef, file_name: &str) -> Self::Path;

    /// Human readable form of `path`, used in errors and logs.
    fn display(&self, path: &Self::PathRef) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OsFs;

#[async_trait]
impl FileSystem for OsFs {
    type Path = std::path::PathBuf;
    type PathRef = std::path::Path;
    type Error = std::io::Error;

    async fn read_dir(&self, path: &Self::PathRef) -> Result<Vec<DirEntry>, Self::Error> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            // RIP non-utf8 paths.
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    warn!(?name, directory = %path.display(), "Skipping entry with non-UTF8 name");
                    continue;
                }
            };

            let kind = entry_kind(&entry.path()).await?;
            entries.push(DirEntry::new(name, kind));
        }

        Ok(entries)
    }

    async fn exists(&self, path: &Self::PathRef) -> Result<bool, Self::Error> {
        tokio::fs::try_exists(path).await
    }

    async fn canonicalize(&self, path: &Self::PathRef) -> Result<Self::Path, Self::Error> {
        tokio::fs::canonicalize(path).await
    }

    fn file_path(&self, directory: &Self::PathRef, file_name: &str) -> Self::Path {
        directory.join(file_name)
    }

    fn display(&self, path: &Self::PathRef) -> String {
        path.display().to_string()
    }
}

/// Follows symlinks, so linked member folders still count as directories.
async fn entry_kind(path: &Path) -> io::Result<EntryKind> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(EntryKind::Directory),
        Ok(_) => Ok(EntryKind::File),
        // Dangling symlink
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(EntryKind::File),
        Err(err) => Err(err),
    }
}
