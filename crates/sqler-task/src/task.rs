use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serde::Serialize;

use crate::{
    error::{TransferError, TransferResult},
    format::{FormatModule, TransferOutcome},
    progress::{CancelToken, Progress, ProgressSnapshot},
};

/// 停止任务时等待后台线程的默认时长
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> TaskState {
        match value {
            0 => TaskState::Idle,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled | TaskState::Failed)
    }
}

type CompleteCallback = Box<dyn FnOnce(bool) + Send>;

/// 在后台线程运行一个格式模块
///
/// 只能协作式停止：`stop` 置位取消信号后最多等待给定时长，不会强制结束线程。
/// 完成回调在线程结束前恰好调用一次，参数为是否成功（取消也算成功）。
pub struct CancellableTask {
    name: String,
    module: Option<Box<dyn FormatModule>>,
    progress: Arc<Progress>,
    cancel: CancelToken,
    state: Arc<AtomicU8>,
    error: Arc<Mutex<Option<String>>>,
    on_complete: Option<CompleteCallback>,
    done: Option<Receiver<()>>,
    handle: Option<JoinHandle<Box<dyn FormatModule>>>,
}

impl CancellableTask {
    pub fn new(
        name: impl Into<String>,
        module: Box<dyn FormatModule>,
    ) -> Self {
        let progress = module.progress();
        Self {
            name: name.into(),
            module: Some(module),
            progress,
            cancel: CancelToken::new(),
            state: Arc::new(AtomicU8::new(TaskState::Idle as u8)),
            error: Arc::new(Mutex::new(None)),
            on_complete: None,
            done: None,
            handle: None,
        }
    }

    pub fn on_complete(
        mut self,
        callback: impl FnOnce(bool) + Send + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn last_error(&self) -> Option<String> {
        self.error.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn start(&mut self) -> TransferResult<()> {
        let state = self.state();
        if state != TaskState::Idle {
            return Err(TransferError::AlreadyStarted(state));
        }
        let Some(mut module) = self.module.take() else {
            return Err(TransferError::AlreadyStarted(state));
        };
        self.state.store(TaskState::Running as u8, Ordering::Release);

        let (done_tx, done_rx) = mpsc::channel();
        let cancel = self.cancel.clone();
        let state_slot = self.state.clone();
        let error_slot = self.error.clone();
        let on_complete = self.on_complete.take();
        let name = self.name.clone();

        let spawned = thread::Builder::new().name(format!("sqler-{}", self.name)).spawn(move || {
            tracing::info!("任务开始: {}", name);
            let result = panic::catch_unwind(AssertUnwindSafe(|| module.start(&cancel)));
            let (state, error) = match result {
                Ok(Ok(TransferOutcome::Completed)) => (TaskState::Completed, None),
                Ok(Ok(TransferOutcome::Cancelled)) => (TaskState::Cancelled, None),
                Ok(Err(err)) => (TaskState::Failed, Some(err.to_string())),
                Err(payload) => (
                    TaskState::Failed,
                    Some(TransferError::Panicked(panic_message(payload.as_ref())).to_string()),
                ),
            };
            match &error {
                Some(err) => tracing::error!("任务失败: {}, {}", name, err),
                None => tracing::info!("任务结束: {}, {:?}", name, state),
            }

            if let Ok(mut slot) = error_slot.lock() {
                *slot = error;
            }
            state_slot.store(state as u8, Ordering::Release);

            if let Some(callback) = on_complete {
                let success = state != TaskState::Failed;
                if panic::catch_unwind(AssertUnwindSafe(|| callback(success))).is_err() {
                    tracing::error!("完成回调异常: {}", name);
                }
            }
            let _ = done_tx.send(());
            module
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.done = Some(done_rx);
                Ok(())
            }
            Err(err) => {
                self.state.store(TaskState::Failed as u8, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// 请求停止并等待线程结束，超时返回 `StopTimeout`
    pub fn stop(
        &mut self,
        timeout: Duration,
    ) -> TransferResult<TaskState> {
        // 未启动时不置位取消信号
        if self.state() == TaskState::Idle {
            return Ok(TaskState::Idle);
        }
        self.cancel.cancel();
        let Some(done) = &self.done else {
            return Ok(self.state());
        };
        match done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.reap();
                Ok(self.state())
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("任务 {} 在 {:?} 内未停止", self.name, timeout);
                Err(TransferError::StopTimeout)
            }
        }
    }

    /// 阻塞等待任务结束
    pub fn wait(&mut self) -> TaskState {
        if let Some(done) = &self.done {
            let _ = done.recv();
        }
        self.reap();
        self.state()
    }

    /// 任务结束后取回模块
    pub fn into_module(mut self) -> Option<Box<dyn FormatModule>> {
        self.wait();
        self.module.take()
    }

    fn reap(&mut self) {
        self.done = None;
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(module) => self.module = Some(module),
                Err(_) => tracing::error!("任务线程无法回收: {}", self.name),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "未知错误".to_string()
    }
}
