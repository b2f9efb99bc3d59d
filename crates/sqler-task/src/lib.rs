// 数据库与 CSV/JSON 文件之间的流式导入导出
pub mod column;
pub mod config;
pub mod error;
pub mod format;
pub mod progress;
pub mod request;
pub mod statement;
pub mod task;

#[cfg(test)]
mod testing;

pub use column::{ColumnClass, ColumnDescriptor, ColumnMapping, describe_cursor, describe_table};
pub use config::TaskConfig;
pub use error::{TransferError, TransferResult};
pub use format::{CsvFormat, FormatKind, FormatModule, ImportSummary, JsonFormat, TransferOutcome};
pub use progress::{CancelToken, Progress, ProgressSnapshot};
pub use request::{Direction, OptionValue, TableRef, TransferRequest};
pub use statement::StatementBuilder;
pub use task::{CancellableTask, DEFAULT_STOP_TIMEOUT, TaskState};
