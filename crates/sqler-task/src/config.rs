use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use sqler_core::DataSourceOptions;

use crate::{error::TransferResult, format::FormatKind, request::TransferRequest};

/// 任务目录中 `config.json` 的内容
#[derive(Debug, Deserialize)]
pub struct TaskConfig {
    pub task_id: String,
    #[serde(default)]
    pub created_at: String,
    pub format: FormatKind,
    pub source: DataSourceOptions,
    pub request: TransferRequest,
    #[serde(default = "default_stop_timeout_seconds")]
    pub stop_timeout_seconds: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_stop_timeout_seconds() -> u64 {
    3
}

fn default_poll_interval_ms() -> u64 {
    200
}

impl TaskConfig {
    pub const FILE_NAME: &'static str = "config.json";

    pub fn load(task_dir: &Path) -> TransferResult<TaskConfig> {
        let content = fs::read_to_string(task_dir.join(Self::FILE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}
