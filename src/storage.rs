use axum::body::Bytes;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, ErrorKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::locking::PathGuard;
use crate::record::{FileRecord, storage_root};

/// Number of body chunks buffered between a request and its writer task.
const WRITE_QUEUE_DEPTH: usize = 16;

/// Fixed on-disk layout: every file lives under `<base>/<relative>/<name>`.
#[derive(Clone, Debug)]
pub struct Storage {
    base_directory: String,
    relative_path: String,
    root: PathBuf,
}

impl Storage {
    pub fn new(base_directory: String, relative_path: String) -> Result<Self, StorageError> {
        let root = storage_root(&base_directory, &relative_path)?;
        Ok(Self {
            base_directory,
            relative_path,
            root,
        })
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn record_for(&self, name: &str) -> Result<FileRecord, StorageError> {
        FileRecord::new(name, &self.relative_path, &self.base_directory)
    }

    /// Prepares the target of `record` and spawns the task that writes it.
    ///
    /// Parent directories are created, any existing file at the path is
    /// removed, and a fresh empty file is opened. The returned
    /// [`PendingWrite`] accepts chunks until [`PendingWrite::finish`]. The
    /// path guard moves into the writer task and is released once the file
    /// is closed.
    pub async fn begin_write(
        &self,
        record: &FileRecord,
        guard: PathGuard,
    ) -> Result<PendingWrite, StorageError> {
        let target = PathBuf::from(record.path());
        self.ensure_no_symlink_components(&target).await?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::remove_file(&target).await {
            Ok(()) => debug!(path = record.path(), "removed existing file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await?;

        let (sender, receiver) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let task = tokio::spawn(drain_into_file(file, receiver, target.clone(), guard));
        Ok(PendingWrite {
            path: target,
            sender,
            task,
        })
    }

    /// Opens a stored file by name without consulting the registry.
    pub async fn open_file(&self, name: &str) -> Result<StoredFile, StorageError> {
        let record = self.record_for(name)?;
        self.ensure_no_symlink_components(Path::new(record.path())).await?;
        let file = match File::open(record.path()).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(record.path().to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(record.path().to_string()));
        }
        Ok(StoredFile {
            record,
            file,
            metadata,
        })
    }

    /// Rejects targets reached through a symlink below the storage root.
    ///
    /// Components that do not exist yet are accepted; they are created as
    /// plain directories by [`Storage::begin_write`].
    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target.strip_prefix(&self.root).map_err(|_| {
            StorageError::InvalidArgument(format!("path outside storage: {}", target.display()))
        })?;
        let mut current = self.root.clone();
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidArgument(format!(
                            "symlinks are not followed: {}",
                            current.display()
                        )));
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidArgument(format!(
                            "not a directory: {}",
                            current.display()
                        )));
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

pub struct StoredFile {
    pub record: FileRecord,
    pub file: File,
    pub metadata: Metadata,
}

/// An open upload target fed by the request that created it.
pub struct PendingWrite {
    path: PathBuf,
    sender: mpsc::Sender<Bytes>,
    task: JoinHandle<Result<u64, StorageError>>,
}

impl PendingWrite {
    /// Queues one chunk; fails once the writer task has stopped.
    pub async fn write(&self, chunk: Bytes) -> Result<(), StorageError> {
        self.sender.send(chunk).await.map_err(|_| {
            StorageError::Io(io::Error::new(
                ErrorKind::BrokenPipe,
                "upload writer stopped",
            ))
        })
    }

    /// Closes the input side and hands back the completion handle.
    pub fn finish(self) -> WriteCompletion {
        drop(self.sender);
        WriteCompletion {
            path: self.path,
            task: self.task,
        }
    }

    /// Stops the writer and removes whatever was written so far.
    pub async fn abort(self) {
        drop(self.sender);
        self.task.abort();
        let _ = self.task.await;
        if let Err(err) = fs::remove_file(&self.path).await
            && err.kind() != ErrorKind::NotFound
        {
            warn!(path = ?self.path, error = %err, "failed to remove partial upload");
        }
    }
}

/// Eventual result of a write started by [`Storage::begin_write`].
pub struct WriteCompletion {
    path: PathBuf,
    task: JoinHandle<Result<u64, StorageError>>,
}

impl WriteCompletion {
    /// Waits for the writer task and returns the number of bytes written.
    pub async fn wait(self) -> Result<u64, StorageError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(StorageError::Io(io::Error::other(err.to_string()))),
        }
    }

    /// Lets the write finish in the background, logging its outcome.
    pub fn detach(self) {
        tokio::spawn(async move {
            let path = self.path.clone();
            match self.wait().await {
                Ok(bytes) => info!(path = ?path, bytes, "background write finished"),
                Err(err) => error!(path = ?path, error = %err, "background write failed"),
            }
        });
    }
}

/// Destination of an upload writer; `close` runs once after the last chunk.
trait UploadSink: AsyncWrite + Unpin + Send + 'static {
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

impl UploadSink for File {
    async fn close(&mut self) -> io::Result<()> {
        self.sync_all().await
    }
}

async fn drain_into_file<W: UploadSink>(
    mut sink: W,
    mut receiver: mpsc::Receiver<Bytes>,
    path: PathBuf,
    _guard: PathGuard,
) -> Result<u64, StorageError> {
    let mut written: u64 = 0;
    while let Some(chunk) = receiver.recv().await {
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    // The bytes are already written; a failed close does not undo the upload.
    if let Err(err) = sink.close().await {
        warn!(path = ?path, error = %err, "failed to close uploaded file");
    }
    Ok(written)
}

#[derive(Debug)]
pub enum StorageError {
    InvalidArgument(String),
    NotFound(String),
    Busy(String),
    Interrupted(String),
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            StorageError::NotFound(path) => write!(f, "file not found: {path}"),
            StorageError::Busy(path) => write!(f, "path is locked by another write: {path}"),
            StorageError::Interrupted(msg) => write!(f, "upload stream interrupted: {msg}"),
            StorageError::Io(err) => write!(f, "io failure: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
