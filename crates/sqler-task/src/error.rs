use sqler_core::DriverError;

use crate::task::TaskState;

/// 传输过程中的错误
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("无法识别 CSV 格式: {0}")]
    DialectDetection(String),
    #[error("源文件格式错误: {0}")]
    MalformedSource(String),
    #[error("导入前需要先分析源文件")]
    NotAnalyzed,
    #[error("创建表失败: {0}")]
    TableCreation(#[source] DriverError),
    #[error("预编译插入语句失败: {0}")]
    StatementPrepare(#[source] DriverError),
    #[error("查询失败: {0}")]
    Query(#[source] DriverError),
    #[error("执行命令失败: {0}")]
    Command(#[source] DriverError),
    #[error("停止任务超时，后台线程仍在运行")]
    StopTimeout,

    #[error("选项 {key} 非法: {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("请求参数非法: {0}")]
    InvalidRequest(String),
    #[error("任务已启动，当前状态: {0:?}")]
    AlreadyStarted(TaskState),
    #[error("任务线程异常退出: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    pub fn invalid_option(
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidOption {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
