use std::fmt;

use crate::{ColumnInfo, DataSourceOptions};

pub use cursor::{CellValue, CursorColumn, RowCursor};
pub use mysql::MySQLDriver;
pub use sqlite::SQLiteDriver;

mod cursor;
mod mysql;
mod sqlite;

#[derive(Clone, Debug)]
pub struct ExecResp {
    pub affected: u64,
}

/// 会话内预编译语句的句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatementId(u32);

impl StatementId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for StatementId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Other(String),
    #[error("配置字段缺失: {0}")]
    MissingField(String),
    #[error("配置字段非法: {0}")]
    InvalidField(String),
    #[error("查询失败: {0}")]
    Query(String),
    #[error("执行失败: {0}")]
    Command(String),
    #[error("预编译失败: {0}")]
    Prepare(String),
    #[error("预编译语句不存在: {0}")]
    UnknownStatement(StatementId),
}

pub trait DatabaseDriver {
    type Config;

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DatabaseSession>, DriverError>;
}

/// 数据库会话
///
/// 一次传输独占一个会话，所有语句按顺序在同一会话上执行。
pub trait DatabaseSession: Send {
    /// 执行不返回结果集的语句
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError>;

    /// 执行查询并返回完整结果
    fn query(
        &mut self,
        sql: &str,
    ) -> Result<RowCursor, DriverError>;

    /// 读取表结构，`table` 可带 `schema.` 前缀
    fn columns(
        &mut self,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, DriverError>;

    /// 预编译带 `?` 占位符的语句，在 `deallocate` 之前可反复执行
    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<StatementId, DriverError>;

    /// 绑定参数并执行预编译语句，`None` 绑定为 NULL
    fn execute(
        &mut self,
        stmt: StatementId,
        params: &[Option<String>],
    ) -> Result<ExecResp, DriverError>;

    fn deallocate(
        &mut self,
        stmt: StatementId,
    ) -> Result<(), DriverError>;
}

pub fn create_connection(opts: &DataSourceOptions) -> Result<Box<dyn DatabaseSession>, DriverError> {
    match opts {
        DataSourceOptions::MySQL(config) => MySQLDriver.create_connection(config),
        DataSourceOptions::SQLite(config) => SQLiteDriver.create_connection(config),
    }
}

pub fn validate_sql(sql: &str) -> Result<(), DriverError> {
    if sql.trim().is_empty() {
        return Err(DriverError::InvalidField("sql".into()));
    }
    Ok(())
}

pub fn escape_quote(s: &str) -> String {
    s.replace('"', "\"\"")
}

pub fn escape_backtick(s: &str) -> String {
    s.replace('`', "``")
}

/// 拆分 `schema.table` 形式的表名
pub fn split_table(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((schema, name)) if !schema.is_empty() => (Some(schema), name),
        _ => (None, table),
    }
}
