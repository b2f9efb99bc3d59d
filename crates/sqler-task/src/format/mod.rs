use std::{
    fs::{self, File},
    io::BufWriter,
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use sqler_core::{CellValue, DatabaseSession, RowCursor};

use crate::{
    column::{ColumnDescriptor, ColumnMapping, describe_cursor},
    error::{TransferError, TransferResult},
    progress::{CancelToken, Progress},
    request::{Direction, TransferRequest},
    statement::{InsertPlan, StatementBuilder, select_query},
};

pub use self::csv::{CsvFormat, CsvOptions, LineSeparator};
pub use self::insert::ImportSummary;
pub use self::json::JsonFormat;
pub use self::sniff::Dialect;

mod csv;
mod insert;
mod json;
pub mod sniff;

/// 内置的文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Csv,
    Json,
}

impl FormatKind {
    pub fn all() -> &'static [FormatKind] {
        &[FormatKind::Csv, FormatKind::Json]
    }

    pub fn label(&self) -> &'static str {
        match self {
            FormatKind::Csv => "CSV",
            FormatKind::Json => "JSON",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FormatKind::Csv => "csv",
            FormatKind::Json => "json",
        }
    }

    /// 按名称或扩展名查找，忽略大小写
    pub fn from_label(label: &str) -> Option<FormatKind> {
        let label = label.trim().trim_start_matches('.');
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.label().eq_ignore_ascii_case(label) || kind.extension().eq_ignore_ascii_case(label))
    }

    /// 创建对应格式的模块，会话由模块独占
    pub fn create(
        &self,
        session: Box<dyn DatabaseSession>,
    ) -> Box<dyn FormatModule> {
        match self {
            FormatKind::Csv => Box::new(CsvFormat::new(session)),
            FormatKind::Json => Box::new(JsonFormat::new(session)),
        }
    }
}

/// 传输结束的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Completed,
    Cancelled,
}

/// 文件格式模块
///
/// 一个实例只运行一次：先 `configure`（导入前还需 `analyze_source`），
/// 再由 `start` 按方向执行导出或导入。
pub trait FormatModule: Send {
    fn kind(&self) -> FormatKind;

    /// 文件选择框使用的过滤器与扩展名
    fn extension_filter(&self) -> (String, &'static str) {
        let kind = self.kind();
        (
            format!("{} 文件 (*.{})", kind.label(), kind.extension()),
            kind.extension(),
        )
    }

    /// 是否支持由数据库服务端写出文件
    fn allows_remote(&self) -> bool;

    fn configure(
        &mut self,
        request: TransferRequest,
    ) -> TransferResult<()>;

    fn request(&self) -> Option<&TransferRequest>;

    /// 只读取推断结构所需的部分，失败时模块回到未分析状态
    fn analyze_source(
        &mut self,
        path: &Path,
    ) -> TransferResult<Vec<ColumnDescriptor>>;

    fn is_analyzed(&self) -> bool;

    fn export_query(
        &self,
        request: &TransferRequest,
    ) -> TransferResult<String> {
        build_export_query(request)
    }

    fn start_export(
        &mut self,
        cancel: &CancelToken,
    ) -> TransferResult<TransferOutcome>;

    fn start_import(
        &mut self,
        cancel: &CancelToken,
    ) -> TransferResult<TransferOutcome>;

    fn progress(&self) -> Arc<Progress>;

    fn start(
        &mut self,
        cancel: &CancelToken,
    ) -> TransferResult<TransferOutcome> {
        let direction = configured(self.request())?.direction;
        match direction {
            Direction::Export => self.start_export(cancel),
            Direction::Import => self.start_import(cancel),
        }
    }
}

pub(crate) fn configured(request: Option<&TransferRequest>) -> TransferResult<&TransferRequest> {
    request.ok_or_else(|| TransferError::InvalidRequest("尚未配置传输参数".into()))
}

/// 自定义查询优先，否则按表与列生成
pub(crate) fn build_export_query(request: &TransferRequest) -> TransferResult<String> {
    if let Some(query) = request.raw_query() {
        return Ok(query.to_string());
    }
    let table = request
        .table
        .as_ref()
        .ok_or_else(|| TransferError::InvalidRequest("缺少导出表".into()))?;
    if request.columns.is_empty() {
        return Err(TransferError::InvalidRequest("没有选择导出列".into()));
    }
    Ok(select_query(&request.columns, table, request.limit, request.offset))
}

/// 需要时先建表，再生成插入计划
pub(crate) fn prepare_target(
    session: &mut dyn DatabaseSession,
    request: &TransferRequest,
) -> TransferResult<InsertPlan> {
    let table = request
        .table
        .as_ref()
        .ok_or_else(|| TransferError::InvalidRequest("缺少目标表".into()))?;

    if !request.create_table {
        return Ok(StatementBuilder::new(table, &request.mappings).insert_plan());
    }

    // 新建的表与源列同名
    let mappings = request
        .mappings
        .iter()
        .map(|m| ColumnMapping {
            dest_column: m.source_name.clone(),
            ..m.clone()
        })
        .collect::<Vec<_>>();
    let builder = StatementBuilder::new(table, &mappings);
    let ddl = builder.create_table();
    tracing::info!("创建目标表: {}", ddl);
    session.exec(&ddl).map_err(TransferError::TableCreation)?;
    Ok(builder.insert_plan())
}

/// 导出列：自定义查询或列数不一致时以结果集为准
pub(crate) fn export_columns(
    request: &TransferRequest,
    cursor: &RowCursor,
) -> Vec<ColumnDescriptor> {
    if request.raw_query().is_some() || request.columns.len() != cursor.columns().len() {
        describe_cursor(cursor)
    } else {
        request.columns.clone()
    }
}

/// 导出时的单元格文本，NULL 输出为空
pub(crate) fn render_cell(value: &CellValue) -> String {
    value.as_string().unwrap_or_default()
}

/// 打开导出文件，自动创建上级目录
pub(crate) fn open_output(path: &Path) -> TransferResult<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{request::TableRef, testing::RecordingSession};

    #[test]
    fn format_registry_lookup() {
        assert_eq!(FormatKind::from_label("csv"), Some(FormatKind::Csv));
        assert_eq!(FormatKind::from_label(".JSON"), Some(FormatKind::Json));
        assert_eq!(FormatKind::from_label("xml"), None);

        let module = FormatKind::Json.create(Box::new(RecordingSession::default()));
        assert_eq!(module.kind(), FormatKind::Json);
        assert_eq!(module.extension_filter(), ("JSON 文件 (*.json)".to_string(), "json"));
        assert!(!module.allows_remote());
        assert!(FormatKind::Csv.create(Box::new(RecordingSession::default())).allows_remote());
    }

    #[test]
    fn format_kind_serde_ids() {
        assert_eq!(serde_json::to_string(&FormatKind::Csv).unwrap(), "\"csv\"");
        let kind: FormatKind = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(kind, FormatKind::Json);
    }

    #[test]
    fn export_query_prefers_raw_query() {
        let request = TransferRequest::export_query("  SELECT 1  ", "/tmp/out.csv");
        assert_eq!(build_export_query(&request).unwrap(), "SELECT 1");

        let request = TransferRequest::export(
            TableRef::new("t"),
            vec![ColumnDescriptor::text("a")],
            "/tmp/out.csv",
        )
        .with_limit(3);
        assert_eq!(build_export_query(&request).unwrap(), "SELECT a FROM t LIMIT 3");
    }

    #[test]
    fn create_table_failure_aborts() {
        let session = RecordingSession::default().fail_exec();
        let log = session.log();
        let mut session: Box<dyn DatabaseSession> = Box::new(session);

        let request = TransferRequest::import(TableRef::new("t"), "/tmp/in.csv")
            .with_create_table(true)
            .with_mappings(ColumnMapping::identity(&[ColumnDescriptor::text("a")]));
        let err = prepare_target(&mut *session, &request).unwrap_err();

        assert!(matches!(err, TransferError::TableCreation(_)));
        assert_eq!(log.statements(), ["CREATE TABLE t (a varchar)"]);
    }

    #[test]
    fn start_without_request_is_rejected() {
        let mut module = FormatKind::Csv.create(Box::new(RecordingSession::default()));
        let err = module.start(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));
    }
}
