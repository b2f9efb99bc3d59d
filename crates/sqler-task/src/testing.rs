use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use sqler_core::{ColumnInfo, DatabaseSession, DriverError, ExecResp, RowCursor, StatementId};

#[derive(Debug, Default)]
struct LogInner {
    statements: Vec<String>,
    params: Vec<Vec<Option<String>>>,
}

/// 会话记录，测试在会话交给模块后仍可读取
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionLog(Arc<Mutex<LogInner>>);

impl SessionLog {
    fn push(
        &self,
        statement: String,
    ) {
        self.0.lock().unwrap().statements.push(statement);
    }

    pub fn statements(&self) -> Vec<String> {
        self.0.lock().unwrap().statements.clone()
    }

    pub fn params(&self) -> Vec<Vec<Option<String>>> {
        self.0.lock().unwrap().params.clone()
    }
}

/// 记录所有语句的会话，可按需让指定调用失败
#[derive(Default)]
pub(crate) struct RecordingSession {
    log: SessionLog,
    cursor: RowCursor,
    fail_exec: bool,
    fail_prepare: bool,
    failing_executions: HashSet<usize>,
    executions: usize,
    next_stmt: u32,
}

impl RecordingSession {
    pub fn log(&self) -> SessionLog {
        self.log.clone()
    }

    pub fn with_cursor(
        mut self,
        cursor: RowCursor,
    ) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn fail_exec(mut self) -> Self {
        self.fail_exec = true;
        self
    }

    pub fn fail_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// 第 `n` 次 execute（从 0 开始）返回错误
    pub fn fail_execution(
        mut self,
        n: usize,
    ) -> Self {
        self.failing_executions.insert(n);
        self
    }
}

impl DatabaseSession for RecordingSession {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        self.log.push(sql.to_string());
        if self.fail_exec {
            return Err(DriverError::Command("exec 被设置为失败".into()));
        }
        Ok(ExecResp { affected: 0 })
    }

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<RowCursor, DriverError> {
        self.log.push(sql.to_string());
        Ok(self.cursor.clone())
    }

    fn columns(
        &mut self,
        _table: &str,
    ) -> Result<Vec<ColumnInfo>, DriverError> {
        Ok(vec![])
    }

    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<StatementId, DriverError> {
        self.log.push(format!("PREPARE {}", sql));
        if self.fail_prepare {
            return Err(DriverError::Prepare("prepare 被设置为失败".into()));
        }
        let id = StatementId::new(self.next_stmt);
        self.next_stmt += 1;
        Ok(id)
    }

    fn execute(
        &mut self,
        stmt: StatementId,
        params: &[Option<String>],
    ) -> Result<ExecResp, DriverError> {
        self.log.push(format!("EXECUTE {}", stmt));
        self.log.0.lock().unwrap().params.push(params.to_vec());

        let n = self.executions;
        self.executions += 1;
        if self.failing_executions.contains(&n) {
            return Err(DriverError::Command(format!("第 {} 次执行被设置为失败", n)));
        }
        Ok(ExecResp { affected: 1 })
    }

    fn deallocate(
        &mut self,
        stmt: StatementId,
    ) -> Result<(), DriverError> {
        self.log.push(format!("DEALLOCATE {}", stmt));
        Ok(())
    }
}
