//! 文件记录与路径解析：文件名 + 固定目录段 → 规范化绝对路径。

use serde::Serialize;
use std::path::{Component, Path, PathBuf};

use crate::storage::StorageError;

pub const DEFAULT_BASE_DIRECTORY: &str = "target";
pub const DEFAULT_RELATIVE_PATH: &str = "webflux-file-server";

/// 一个已上传文件的身份信息，`path` 为唯一键。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    name: String,
    relative_path: String,
    base_directory: String,
    path: String,
}

impl FileRecord {
    /// 校验各段非空并计算规范化路径。
    pub fn new(name: &str, relative_path: &str, base_directory: &str) -> Result<Self, StorageError> {
        require_non_blank(name, "file item name may not be empty")?;
        let path = resolve_path(base_directory, relative_path, name)?;
        Ok(Self {
            name: name.to_string(),
            relative_path: relative_path.to_string(),
            base_directory: base_directory.to_string(),
            path: path.to_string_lossy().into_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// 返回 `base/relative` 对应的绝对存储目录。
pub fn storage_root(base_directory: &str, relative_path: &str) -> Result<PathBuf, StorageError> {
    require_non_blank(relative_path, "file item relative path may not be empty")?;
    require_non_blank(base_directory, "file item base directory may not be empty")?;
    absolute_normalized(&Path::new(base_directory).join(relative_path))
}

/// 拼接三段路径并消解 `.`、`..`，结果必须位于存储目录之内。
pub fn resolve_path(
    base_directory: &str,
    relative_path: &str,
    name: &str,
) -> Result<PathBuf, StorageError> {
    require_non_blank(name, "file item name may not be empty")?;
    let root = storage_root(base_directory, relative_path)?;
    let resolved = absolute_normalized(&root.join(name))?;
    if resolved == root || !resolved.starts_with(&root) {
        return Err(StorageError::InvalidArgument(format!(
            "file item name escapes storage directory: {name}"
        )));
    }
    Ok(resolved)
}

fn require_non_blank(value: &str, message: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::InvalidArgument(message.to_string()));
    }
    Ok(())
}

fn absolute_normalized(path: &Path) -> Result<PathBuf, StorageError> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => continue,
            // `pop` stops at the root, so `..` never climbs above it.
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(segment) => normalized.push(segment),
        }
    }
    Ok(normalized)
}
