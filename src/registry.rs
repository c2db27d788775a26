//! 已上传文件的内存索引，进程重启后为空。

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::record::FileRecord;

#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, FileRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 `record.path()` 为键插入或覆盖记录。
    pub async fn save(&self, record: FileRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(record.path().to_string(), record);
    }

    /// 返回当前全部记录的快照，顺序不保证。
    pub async fn list_all(&self) -> Vec<FileRecord> {
        self.entries.read().await.values().cloned().collect()
    }
}
