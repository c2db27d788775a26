//! 后台任务：定期清理空闲的路径锁。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LOCK_PRUNE_INTERVAL_SECS;
use crate::locking::LockManager;

/// 启动后台任务（路径锁表清理）。
pub fn spawn_background_tasks(locks: Arc<LockManager>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(LOCK_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let removed = locks.prune_idle().await;
            if removed > 0 {
                let remaining = locks.tracked().await;
                debug!(removed, remaining, "pruned idle path locks");
            }
        }
    });
}
