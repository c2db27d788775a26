//! 内存路径锁：串行化同一目标路径上的上传写入。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// Held for the whole lifetime of a write to one resolved path.
pub type PathGuard = OwnedMutexGuard<()>;

/// Manages asynchronous mutexes keyed by resolved file path.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Debug)]
pub struct LockTimeout;

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timed out waiting for path lock")
    }
}

impl LockManager {
    /// 创建新的锁管理器实例。
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 在给定超时时间内获取路径锁。
    pub async fn lock_path_with_timeout(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<PathGuard, LockTimeout> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| LockTimeout)
    }

    /// 移除无人持有或等待的锁，返回移除数量。
    pub async fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        // The table's own Arc is the only reference once nobody holds or awaits the lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_writer_times_out_while_lock_is_held() {
        let locks = LockManager::new();
        let _held = locks
            .lock_path_with_timeout("/srv/a.txt", Duration::from_millis(50))
            .await
            .expect("first lock");

        let second = locks
            .lock_path_with_timeout("/srv/a.txt", Duration::from_millis(20))
            .await;
        assert!(second.is_err());

        let other = locks
            .lock_path_with_timeout("/srv/b.txt", Duration::from_millis(20))
            .await;
        assert!(other.is_ok(), "different paths must not block each other");
    }

    #[tokio::test]
    async fn prune_idle_keeps_held_locks() {
        let locks = LockManager::new();
        let held = locks
            .lock_path_with_timeout("/srv/held.txt", Duration::from_millis(50))
            .await
            .expect("held lock");
        drop(
            locks
                .lock_path_with_timeout("/srv/released.txt", Duration::from_millis(50))
                .await
                .expect("released lock"),
        );

        assert_eq!(locks.prune_idle().await, 1);
        assert_eq!(locks.tracked().await, 1);

        drop(held);
        assert_eq!(locks.prune_idle().await, 1);
        assert_eq!(locks.tracked().await, 0);
    }
}
