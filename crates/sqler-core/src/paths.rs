use std::{fs::create_dir_all, path::PathBuf};

/// 获取 sqler 根目录（~/.sqler）
///
/// Fallback: 如果 home_dir 失败，使用 ./.sqler
pub fn root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".sqler"))
        .unwrap_or_else(|| PathBuf::from(".sqler"))
}

/// 获取任务根目录（~/.sqler/tasks）
pub fn tasks_dir() -> PathBuf {
    let dir = root_dir().join("tasks");
    let _ = create_dir_all(&dir);
    dir
}

/// 获取指定任务的目录（~/.sqler/tasks/{task_id}）
///
/// 任务目录中约定的文件：
/// - `config.json` 任务配置
/// - `task.log` 任务日志
/// - `stop` 存在即请求停止
pub fn task_dir(id: &str) -> PathBuf {
    let dir = tasks_dir().join(id);
    let _ = create_dir_all(&dir);
    dir
}
