//! Filesystem capability used by the copy job
//!
//! [`OsFs`] is the real filesystem. [`MemoryFs`] is an in-memory tree that
//! can stand in for it when the job has to run without touching disk.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Kind of a filesystem entry, as reported by a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Readable handle on a source file
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable destination file that can be durably synced
#[async_trait]
pub trait WritableFile: AsyncWrite + Send + Unpin {
    /// Flush data and metadata to durable storage
    async fn sync_all(&mut self) -> io::Result<()>;
}

#[async_trait]
impl WritableFile for tokio::fs::File {
    async fn sync_all(&mut self) -> io::Result<()> {
        tokio::fs::File::sync_all(self).await
    }
}

/// Filesystem operations needed by the traversal engine and local mirror
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Query whether `path` is a file or a directory (symlinks are followed)
    async fn stat(&self, path: &Path) -> io::Result<EntryKind>;

    /// Full paths of the immediate children of a directory
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    async fn open(&self, path: &Path) -> io::Result<FileReader>;

    /// Create a file, truncating it if it exists
    async fn create(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;

    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Absolute path of an existing entry with all links resolved
    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// The operating system filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

#[async_trait]
impl Filesystem for OsFs {
    async fn stat(&self, path: &Path) -> io::Result<EntryKind> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(if metadata.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        })
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        Ok(children)
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(file))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::canonicalize(path).await
    }
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: BTreeMap<PathBuf, Node>,
    synced: Vec<PathBuf>,
}

/// In-memory filesystem
///
/// Paths are cleaned lexically and treated as absolute. `create` requires
/// the parent directory to exist, like a real filesystem does.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    state: Arc<Mutex<MemoryState>>,
    fail_sync: Arc<AtomicBool>,
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "file does not exist")
}

fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
        }
    }
    cleaned
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert_dirs(state: &mut MemoryState, path: &Path) -> io::Result<()> {
        for ancestor in path.ancestors().collect::<Vec<_>>().into_iter().rev() {
            match state.nodes.get(ancestor) {
                Some(Node::File(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("'{}' is a file", ancestor.display()),
                    ));
                }
                Some(Node::Dir) => {}
                None => {
                    state.nodes.insert(ancestor.to_path_buf(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    /// Write a whole file, creating parent directories as needed
    pub fn write_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> io::Result<()> {
        let path = clean(path.as_ref());
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            Self::insert_dirs(&mut state, parent)?;
        }
        state.nodes.insert(path, Node::File(data.into()));
        Ok(())
    }

    /// Contents of a file, if it exists
    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.lock().nodes.get(&clean(path.as_ref())) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Whether any entry exists at or below `path`
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let path = clean(path.as_ref());
        self.lock().nodes.keys().any(|p| p.starts_with(&path))
    }

    /// Paths that received a successful `sync_all`, in order
    pub fn synced(&self) -> Vec<PathBuf> {
        self.lock().synced.clone()
    }

    /// Make every subsequent `sync_all` fail
    pub fn fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Filesystem for MemoryFs {
    async fn stat(&self, path: &Path) -> io::Result<EntryKind> {
        match self.lock().nodes.get(&clean(path)) {
            Some(Node::Dir) => Ok(EntryKind::Dir),
            Some(Node::File(_)) => Ok(EntryKind::File),
            None => Err(not_found()),
        }
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let path = clean(path);
        let state = self.lock();
        match state.nodes.get(&path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => {
                return Err(io::Error::other("not a directory"));
            }
            None => return Err(not_found()),
        }
        Ok(state
            .nodes
            .keys()
            .filter(|p| p.parent() == Some(path.as_path()))
            .cloned()
            .collect())
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        match self.lock().nodes.get(&clean(path)) {
            Some(Node::File(data)) => Ok(Box::new(io::Cursor::new(data.clone()))),
            Some(Node::Dir) => Err(io::Error::other("is a directory")),
            None => Err(not_found()),
        }
    }

    async fn create(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let path = clean(path);
        let mut state = self.lock();
        let parent_is_dir = path
            .parent()
            .is_none_or(|parent| matches!(state.nodes.get(parent), Some(Node::Dir)));
        if !parent_is_dir {
            return Err(not_found());
        }
        if matches!(state.nodes.get(&path), Some(Node::Dir)) {
            return Err(io::Error::other("is a directory"));
        }
        state.nodes.insert(path.clone(), Node::File(Vec::new()));
        Ok(Box::new(MemoryFile {
            fs: self.clone(),
            path,
        }))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let path = clean(path);
        Self::insert_dirs(&mut self.lock(), &path)
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let path = clean(path);
        if self.lock().nodes.contains_key(&path) {
            Ok(path)
        } else {
            Err(not_found())
        }
    }
}

struct MemoryFile {
    fs: MemoryFs,
    path: PathBuf,
}

impl AsyncWrite for MemoryFile {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.fs.lock();
        match state.nodes.get_mut(&self.path) {
            Some(Node::File(data)) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(not_found())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl WritableFile for MemoryFile {
    async fn sync_all(&mut self) -> io::Result<()> {
        if self.fs.fail_sync.load(Ordering::SeqCst) {
            return Err(io::Error::other("sync failed"));
        }
        self.fs.lock().synced.push(self.path.clone());
        Ok(())
    }
}
