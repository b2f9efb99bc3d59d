use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use serde::Serialize;

/// 传输进度计数器
///
/// 只有工作线程写入，轮询方只读。
#[derive(Debug, Default)]
pub struct Progress {
    current: AtomicU64,
    max: AtomicU64,
}

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_current(
        &self,
        current: u64,
    ) {
        self.current.store(current, Ordering::Release);
    }

    /// 0 表示总数未知
    pub fn set_max(
        &self,
        max: u64,
    ) {
        self.max.store(max, Ordering::Release);
    }

    pub fn reset(&self) {
        self.set_current(0);
        self.set_max(0);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current_row: self.current.load(Ordering::Acquire),
            max_row: self.max.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub current_row: u64,
    pub max_row: u64,
}

impl ProgressSnapshot {
    /// 百分比，总数未知时为 None
    pub fn percent(&self) -> Option<f64> {
        if self.max_row == 0 {
            return None;
        }
        Some((self.current_row as f64 / self.max_row as f64 * 100.0).min(100.0))
    }
}

/// 协作式取消信号，逐行检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_latest_values() {
        let progress = Progress::new();
        assert_eq!(progress.snapshot().percent(), None);

        progress.set_max(4);
        progress.set_current(1);
        let snap = progress.snapshot();
        assert_eq!(snap, ProgressSnapshot { current_row: 1, max_row: 4 });
        assert_eq!(snap.percent(), Some(25.0));

        progress.reset();
        assert_eq!(progress.snapshot().max_row, 0);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(!worker.is_cancelled());
        token.cancel();
        assert!(worker.is_cancelled());
    }
}
