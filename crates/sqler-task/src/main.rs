use std::env;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::thread;

use serde::Serialize;
use tracing_appender::{non_blocking, rolling::never};
use tracing_subscriber::{EnvFilter, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt};

use sqler_core::{create_connection, task_dir as default_task_dir};
use sqler_task::{
    CancellableTask, ColumnMapping, Direction, TaskConfig, TaskState, TransferRequest, describe_table,
};

/// 进度输出消息（写入 stdout 的 JSON Lines）
#[derive(Debug, Serialize)]
pub struct ProgressMessage {
    kind: MessageKind,
    data: serde_json::Value,
}

/// 消息类型
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Progress,
    Status,
    Error,
    Completed,
}

/// 存在即请求停止
const STOP_FILE: &str = "stop";

/// 初始化任务日志系统
fn init_task_logging(task_dir: &Path) -> non_blocking::WorkerGuard {
    let log_file = never(task_dir, "task.log");
    let (non_blocking, guard) = non_blocking(log_file);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(layer().with_writer(stdout))
        .with(layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

fn parse_task_dir() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    for i in 0..args.len() {
        if i + 1 >= args.len() {
            break;
        }
        match args[i].as_str() {
            "--task-dir" => return Some(PathBuf::from(&args[i + 1])),
            "--task-id" => return Some(default_task_dir(&args[i + 1])),
            _ => {}
        }
    }
    None
}

fn main() {
    // 1. 解析命令行参数
    let task_dir = match parse_task_dir() {
        Some(dir) => dir,
        None => {
            print_error("fatal", "缺少 --task-dir 参数");
            eprintln!("用法: sqler-task --task-dir <DIR> | --task-id <ID>");
            exit(1);
        }
    };

    // 2. 初始化日志系统
    let _log_guard = init_task_logging(&task_dir);
    tracing::info!("任务进程启动，task_dir: {:?}", task_dir);

    // 3. 读取任务配置
    let config = match TaskConfig::load(&task_dir) {
        Ok(cfg) => cfg,
        Err(e) => {
            print_error("fatal", &format!("无法读取配置文件: {}", e));
            exit(1);
        }
    };
    tracing::info!(
        "任务配置解析成功: task_id={}, format={}, direction={:?}",
        config.task_id,
        config.format.label(),
        config.request.direction
    );

    // 4. 建立数据库连接
    tracing::info!(
        "正在连接数据库: {} {}",
        config.source.kind().label(),
        config.source.endpoint()
    );
    let mut session = match create_connection(&config.source) {
        Ok(s) => s,
        Err(e) => {
            print_error("fatal", &format!("数据库连接失败: {}", e));
            exit(1);
        }
    };
    tracing::info!("数据库连接成功");

    // 5. 补全请求：导出未选列时导出整表，导入未给映射时按源列原样导入
    let mut request: TransferRequest = config.request.clone();
    if request.direction == Direction::Export && request.raw_query().is_none() && request.columns.is_empty() {
        if let Some(table) = &request.table {
            match describe_table(&mut *session, table) {
                Ok(columns) => request.columns = columns,
                Err(e) => {
                    print_error("fatal", &format!("读取表结构失败: {}", e));
                    exit(1);
                }
            }
        }
    }

    let mut module = config.format.create(session);
    if request.direction == Direction::Import {
        let columns = match module.analyze_source(&request.file_path) {
            Ok(columns) => columns,
            Err(e) => {
                print_error("fatal", &format!("分析源文件失败: {}", e));
                exit(1);
            }
        };
        print_status("analyzed", serde_json::json!({ "columns": columns }));
        if request.mappings.is_empty() {
            request.mappings = ColumnMapping::identity(&columns);
        }
    }

    if let Err(e) = module.configure(request) {
        print_error("fatal", &format!("任务参数错误: {}", e));
        exit(1);
    }

    // 6. 后台运行并轮询进度
    let mut task = CancellableTask::new(config.task_id.clone(), module).on_complete(|success| {
        tracing::info!("任务完成回调: success={}", success);
    });
    if let Err(e) = task.start() {
        print_error("fatal", &format!("任务启动失败: {}", e));
        exit(1);
    }
    print_status("running", serde_json::Value::Null);

    let stop_path = task_dir.join(STOP_FILE);
    let mut stop_requested = false;
    while !task.state().is_terminal() {
        print_progress(&task);

        if !stop_requested && stop_path.exists() {
            stop_requested = true;
            tracing::info!("收到停止请求");
            print_status("stopping", serde_json::Value::Null);
            // 超时后继续轮询，线程只能等其自行结束
            if let Err(e) = task.stop(config.stop_timeout()) {
                print_error("warning", &e.to_string());
            }
        }
        thread::sleep(config.poll_interval());
    }

    // 7. 输出结果
    let state = task.wait();
    print_progress(&task);
    let success = state != TaskState::Failed;
    print_message(ProgressMessage {
        kind: MessageKind::Completed,
        data: serde_json::json!({
            "success": success,
            "state": state,
            "error": task.last_error(),
            "finished_at": chrono::Local::now().to_rfc3339(),
        }),
    });

    exit(if success { 0 } else { 1 });
}

fn print_progress(task: &CancellableTask) {
    let snapshot = task.progress();
    print_message(ProgressMessage {
        kind: MessageKind::Progress,
        data: serde_json::to_value(snapshot).unwrap_or_default(),
    });
}

fn print_status(
    status: &str,
    detail: serde_json::Value,
) {
    print_message(ProgressMessage {
        kind: MessageKind::Status,
        data: serde_json::json!({
            "status": status,
            "detail": detail,
        }),
    });
}

pub fn print_error(
    severity: &str,
    message: &str,
) {
    print_message(ProgressMessage {
        kind: MessageKind::Error,
        data: serde_json::json!({
            "severity": severity,
            "message": message,
        }),
    });
}

fn print_message(msg: ProgressMessage) {
    if let Ok(json) = serde_json::to_string(&msg) {
        println!("{}", json);
    }
}
