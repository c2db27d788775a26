//! 表单上传处理器：读取 multipart `file` 字段，写入磁盘并登记到索引。

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use futures_util::stream::{Stream, StreamExt};
use std::fmt::Display;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::locking::LockManager;
use crate::record::FileRecord;
use crate::registry::Registry;
use crate::storage::{Storage, StorageError};

pub const FILE_FIELD: &str = "file";

/// Whether an upload waits for its file write before reporting success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Await,
    /// Register and respond as soon as the body has been handed to the writer.
    Detach,
}

#[derive(Debug)]
pub struct UploadConfig {
    pub lock_wait: Duration,
    pub write_mode: WriteMode,
}

/// 接收 multipart 上传，返回 JSON 布尔值表示是否成功。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(registry): Extension<Arc<Registry>>,
    Extension(lock_manager): Extension<Arc<LockManager>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<bool>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = field.name(), "skipping multipart field");
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let mut oversized = None;
        let content = field.map(|chunk| {
            chunk.inspect_err(|err| {
                if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    oversized = Some(err.body_text());
                }
            })
        });
        let stored =
            store_upload(&storage, &registry, &lock_manager, &upload, &name, content).await;
        if let Some(message) = oversized {
            return Err(ApiError::PayloadTooLarge(message));
        }
        return Ok(JsonResponse(stored));
    }
    Err(ApiError::BadRequest(format!(
        "multipart field `{FILE_FIELD}` is required"
    )))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// 写入上传内容并登记，失败只记录日志并返回 `false`。
pub async fn store_upload<S, E>(
    storage: &Storage,
    registry: &Registry,
    lock_manager: &LockManager,
    upload: &UploadConfig,
    name: &str,
    content: S,
) -> bool
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    match write_upload(storage, registry, lock_manager, upload, name, content).await {
        Ok(record) => {
            info!(name, path = record.path(), "file created");
            true
        }
        Err(err) => {
            error!(name, error = %err, "upload failed");
            false
        }
    }
}

async fn write_upload<S, E>(
    storage: &Storage,
    registry: &Registry,
    lock_manager: &LockManager,
    upload: &UploadConfig,
    name: &str,
    content: S,
) -> Result<FileRecord, StorageError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let record = storage.record_for(name)?;
    let guard = lock_manager
        .lock_path_with_timeout(record.path(), upload.lock_wait)
        .await
        .map_err(|_| StorageError::Busy(record.path().to_string()))?;
    let pending = storage.begin_write(&record, guard).await?;

    let mut content = pin!(content);
    while let Some(chunk) = content.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(name, error = %err, "upload stream failed, discarding partial file");
                pending.abort().await;
                return Err(StorageError::Interrupted(err.to_string()));
            }
        };
        if chunk.is_empty() {
            continue;
        }
        if let Err(err) = pending.write(chunk).await {
            // The writer only stops early on an I/O error; report that instead.
            return Err(match pending.finish().wait().await {
                Err(cause) => cause,
                Ok(_) => err,
            });
        }
    }

    let completion = pending.finish();
    match upload.write_mode {
        WriteMode::Await => {
            let bytes = completion.wait().await?;
            debug!(name, bytes, "upload written");
        }
        WriteMode::Detach => completion.detach(),
    }
    registry.save(record.clone()).await;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::io;
    use std::path::Path;
    use tempfile::tempdir;
    use tokio::fs;

    use crate::record::DEFAULT_RELATIVE_PATH;

    struct Fixture {
        _temp: tempfile::TempDir,
        storage: Storage,
        registry: Registry,
        locks: LockManager,
        upload: UploadConfig,
    }

    fn fixture(write_mode: WriteMode) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let base = temp.path().to_string_lossy().into_owned();
        Fixture {
            storage: Storage::new(base, DEFAULT_RELATIVE_PATH.to_string()).expect("storage"),
            _temp: temp,
            registry: Registry::new(),
            locks: LockManager::new(),
            upload: UploadConfig {
                lock_wait: Duration::from_secs(1),
                write_mode,
            },
        }
    }

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(
            chunks
                .iter()
                .copied()
                .map(|chunk| Ok(Bytes::from_static(chunk)))
                .collect::<Vec<_>>(),
        )
    }

    impl Fixture {
        async fn put<S>(&self, name: &str, content: S) -> bool
        where
            S: Stream<Item = Result<Bytes, io::Error>>,
        {
            store_upload(
                &self.storage,
                &self.registry,
                &self.locks,
                &self.upload,
                name,
                content,
            )
            .await
        }

        async fn download(&self, name: &str) -> Vec<u8> {
            let stored = self.storage.open_file(name).await.expect("open");
            fs::read(stored.record.path()).await.expect("read")
        }
    }

    #[tokio::test]
    async fn upload_registers_single_record() {
        let fx = fixture(WriteMode::Await);
        assert!(fx.put("a.txt", body(&[b"hello"])).await);

        let records = fx.registry.list_all().await;
        assert_eq!(records.len(), 1);
        assert!(Path::new(records[0].path()).ends_with("webflux-file-server/a.txt"));
        assert_eq!(records[0].name(), "a.txt");
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes() {
        let fx = fixture(WriteMode::Await);
        assert!(fx.put("b.bin", body(&[&[1], &[2, 3]])).await);
        assert_eq!(fx.download("b.bin").await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reupload_overwrites_previous_content() {
        let fx = fixture(WriteMode::Await);
        assert!(fx.put("c.txt", body(&[b"X"])).await);
        assert!(fx.put("c.txt", body(&[b"Y"])).await);

        assert_eq!(fx.download("c.txt").await, b"Y");
        assert_eq!(fx.registry.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_uploads_to_same_name_do_not_interleave() {
        let fx = fixture(WriteMode::Await);
        let first: &[&'static [u8]] = &[b"aaaa", b"aaaa", b"aaaa"];
        let second: &[&'static [u8]] = &[b"bbbb", b"bbbb", b"bbbb"];

        let (a, b) = tokio::join!(
            fx.put("same.txt", body(first)),
            fx.put("same.txt", body(second))
        );
        assert!(a && b);

        let content = fx.download("same.txt").await;
        assert!(
            content == first.concat() || content == second.concat(),
            "unexpected content {content:?}"
        );
        assert_eq!(fx.registry.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_body_creates_empty_file() {
        let fx = fixture(WriteMode::Await);
        assert!(fx.put("empty.txt", body(&[])).await);
        assert!(fx.download("empty.txt").await.is_empty());
    }

    #[tokio::test]
    async fn blank_name_reports_failure_without_registering() {
        let fx = fixture(WriteMode::Await);
        assert!(!fx.put("   ", body(&[b"data"])).await);
        assert!(fx.registry.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn escaping_name_reports_failure() {
        let fx = fixture(WriteMode::Await);
        assert!(!fx.put("../outside.txt", body(&[b"data"])).await);
        assert!(fx.registry.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn interrupted_stream_discards_partial_file() {
        let fx = fixture(WriteMode::Await);
        let content = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);

        assert!(!fx.put("broken.txt", content).await);
        assert!(fx.registry.list_all().await.is_empty());
        let target = fx.storage.root_path().join("broken.txt");
        assert!(fs::metadata(target).await.is_err());
    }

    #[tokio::test]
    async fn locked_path_reports_failure_after_wait() {
        let mut fx = fixture(WriteMode::Await);
        fx.upload.lock_wait = Duration::from_millis(20);
        let record = fx.storage.record_for("busy.txt").expect("record");
        let _held = fx
            .locks
            .lock_path_with_timeout(record.path(), Duration::from_secs(1))
            .await
            .expect("lock");

        assert!(!fx.put("busy.txt", body(&[b"data"])).await);
        assert!(fx.registry.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn detached_write_completes_in_background() {
        let fx = fixture(WriteMode::Detach);
        assert!(fx.put("later.txt", body(&[b"eventually"])).await);
        assert_eq!(fx.registry.list_all().await.len(), 1);

        // The writer holds the path lock until the file is closed.
        let record = fx.storage.record_for("later.txt").expect("record");
        let _guard = fx
            .locks
            .lock_path_with_timeout(record.path(), Duration::from_secs(5))
            .await
            .expect("lock after write");
        assert_eq!(fx.download("later.txt").await, b"eventually");
    }
}
