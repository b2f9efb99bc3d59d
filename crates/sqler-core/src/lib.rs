use std::path::Path;

use serde::{Deserialize, Serialize};

// 核心模块导出
pub mod driver;
pub mod paths;

// 重新导出 driver 类型
pub use driver::{
    CellValue, CursorColumn, DatabaseDriver, DatabaseSession, DriverError, ExecResp, RowCursor, StatementId,
    create_connection,
};

pub use paths::{root_dir, task_dir, tasks_dir};

// ============================================================================
// Model Types
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: String,
    pub comment: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub default_value: String,
    pub max_length: u64,
    pub auto_increment: bool,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceKind {
    MySQL,
    SQLite,
}

impl DataSourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            DataSourceKind::MySQL => "MySQL",
            DataSourceKind::SQLite => "SQLite",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MySQLOptions {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub use_tls: bool,
}

impl Default for MySQLOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: "3306".into(),
            username: "root".into(),
            password: "".into(),
            database: String::new(),
            use_tls: false,
        }
    }
}

impl MySQLOptions {
    pub fn endpoint(&self) -> String {
        let scheme = if self.use_tls { "mysqls" } else { "mysql" };
        let db = self.database.trim();
        if db.is_empty() {
            format!("{}://{}:{}", scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}/{}", scheme, self.host, self.port, db)
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SQLiteOptions {
    #[serde(default)]
    pub readonly: bool,
    pub filepath: String,
}

impl SQLiteOptions {
    pub fn new(filepath: impl Into<String>) -> Self {
        Self {
            readonly: false,
            filepath: filepath.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        let path = self.filepath.trim();
        if path.is_empty() {
            return "sqlite://<未配置文件>".into();
        }

        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path);

        if self.readonly {
            format!("sqlite://{}?mode=ro", name)
        } else {
            format!("sqlite://{}", name)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DataSourceOptions {
    MySQL(MySQLOptions),
    SQLite(SQLiteOptions),
}

impl DataSourceOptions {
    pub fn kind(&self) -> DataSourceKind {
        match self {
            DataSourceOptions::MySQL(_) => DataSourceKind::MySQL,
            DataSourceOptions::SQLite(_) => DataSourceKind::SQLite,
        }
    }

    pub fn endpoint(&self) -> String {
        match self {
            DataSourceOptions::MySQL(opts) => opts.endpoint(),
            DataSourceOptions::SQLite(opts) => opts.endpoint(),
        }
    }
}
