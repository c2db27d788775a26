//! 文件列表与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::ApiError;
use crate::http::{content_disposition, header_value};
use crate::record::FileRecord;
use crate::registry::Registry;
use crate::storage::{Storage, StoredFile};

/// 列出索引中的全部文件记录（按路径排序）。
pub async fn list_files(
    Extension(registry): Extension<Arc<Registry>>,
) -> JsonResponse<Vec<FileRecord>> {
    let mut records = registry.list_all().await;
    records.sort_by(|a, b| a.path().cmp(b.path()));
    info!(count = records.len(), "list files");
    JsonResponse(records)
}

/// 按文件名下载，路径由命名规则直接推导，不查询索引。
pub async fn download_file(
    Path(filename): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let StoredFile {
        record,
        file,
        metadata,
    } = storage.open_file(&filename).await?;
    let file_size = metadata.len();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition(record.name()))?,
    );
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(
        header::CONTENT_LENGTH,
        header_value(&file_size.to_string())?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }

    info!(path = record.path(), size = file_size, "download file");
    let stream = ReaderStream::new(file);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}
