use serde::Serialize;

use sqler_core::{DatabaseSession, StatementId};

use crate::{
    error::{TransferError, TransferResult},
    statement::{InsertColumn, InsertPlan},
};

/// 导入结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows_read: u64,
    pub rows_imported: u64,
    pub rows_failed: u64,
}

/// 一次导入期间复用的预编译插入语句
///
/// 语句在 `finish` 或 drop 时释放，取消和出错的路径同样会释放。
pub(crate) struct PreparedInsert<'s> {
    session: &'s mut dyn DatabaseSession,
    stmt: Option<StatementId>,
    columns: Vec<InsertColumn>,
    summary: ImportSummary,
}

impl<'s> PreparedInsert<'s> {
    pub fn prepare(
        session: &'s mut dyn DatabaseSession,
        plan: InsertPlan,
    ) -> TransferResult<Self> {
        tracing::debug!("预编译插入语句: {}", plan.sql);
        let stmt = session.prepare(&plan.sql).map_err(TransferError::StatementPrepare)?;
        Ok(Self {
            session,
            stmt: Some(stmt),
            columns: plan.columns,
            summary: ImportSummary::default(),
        })
    }

    pub fn columns(&self) -> &[InsertColumn] {
        &self.columns
    }

    pub fn rows_read(&self) -> u64 {
        self.summary.rows_read
    }

    /// 插入一行，`row` 为 Err 时表示该行无法取值
    ///
    /// 单行失败只记录日志，不中断导入。
    pub fn insert(
        &mut self,
        row: Result<Vec<Option<String>>, String>,
    ) {
        self.summary.rows_read += 1;
        let row_no = self.summary.rows_read;

        let params = match row {
            Ok(params) => params,
            Err(reason) => {
                tracing::warn!("跳过第 {} 行: {}", row_no, reason);
                self.summary.rows_failed += 1;
                return;
            }
        };

        let Some(stmt) = self.stmt else {
            self.summary.rows_failed += 1;
            return;
        };
        match self.session.execute(stmt, &params) {
            Ok(_) => self.summary.rows_imported += 1,
            Err(err) => {
                tracing::warn!("第 {} 行插入失败: {}", row_no, err);
                self.summary.rows_failed += 1;
            }
        }
    }

    pub fn finish(mut self) -> ImportSummary {
        self.release();
        self.summary
    }

    fn release(&mut self) {
        if let Some(stmt) = self.stmt.take() {
            if let Err(err) = self.session.deallocate(stmt) {
                tracing::warn!("释放插入语句失败: {}", err);
            }
        }
    }
}

impl Drop for PreparedInsert<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
