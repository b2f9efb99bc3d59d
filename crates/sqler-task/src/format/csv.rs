use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use csv::{QuoteStyle, StringRecord, Terminator, WriterBuilder};

use sqler_core::{CellValue, DatabaseSession, RowCursor};

use crate::{
    column::{ColumnClass, ColumnDescriptor},
    error::{TransferError, TransferResult},
    progress::{CancelToken, Progress},
    request::{OptionValue, TransferRequest},
    statement::into_outfile,
};

use super::{
    FormatKind, FormatModule, TransferOutcome, build_export_query, configured, export_columns,
    insert::PreparedInsert,
    open_output, prepare_target, render_cell,
    sniff::{Dialect, has_header, sniff},
};

/// 行结束符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSeparator {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl LineSeparator {
    pub fn parse(value: &str) -> Option<LineSeparator> {
        match value {
            "\n" | "\\n" => Some(LineSeparator::Lf),
            "\r\n" | "\\r\\n" => Some(LineSeparator::CrLf),
            "\r" | "\\r" => Some(LineSeparator::Cr),
            other => match other.to_ascii_uppercase().as_str() {
                "LF" => Some(LineSeparator::Lf),
                "CRLF" => Some(LineSeparator::CrLf),
                "CR" => Some(LineSeparator::Cr),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineSeparator::Lf => "\n",
            LineSeparator::CrLf => "\r\n",
            LineSeparator::Cr => "\r",
        }
    }

    fn terminator(&self) -> Terminator {
        match self {
            LineSeparator::Lf => Terminator::Any(b'\n'),
            LineSeparator::CrLf => Terminator::CRLF,
            LineSeparator::Cr => Terminator::Any(b'\r'),
        }
    }
}

/// CSV 导出选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub field_separator: u8,
    pub line_separator: LineSeparator,
    pub enclose_string: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            field_separator: b';',
            line_separator: LineSeparator::Lf,
            enclose_string: b'"',
        }
    }
}

impl CsvOptions {
    pub const FIELD_SEPARATOR: &'static str = "field_separator";
    pub const LINE_SEPARATOR: &'static str = "line_separator";
    pub const ENCLOSE_STRING: &'static str = "enclose_string";

    pub fn from_options(options: &BTreeMap<String, OptionValue>) -> TransferResult<Self> {
        let mut parsed = Self::default();
        for (key, value) in options {
            let text = value.as_text();
            match key.as_str() {
                Self::FIELD_SEPARATOR => parsed.field_separator = single_char(key, &text)?,
                Self::ENCLOSE_STRING => parsed.enclose_string = single_char(key, &text)?,
                Self::LINE_SEPARATOR => {
                    parsed.line_separator = LineSeparator::parse(&text)
                        .ok_or_else(|| TransferError::invalid_option(key, format!("不支持的换行符 {:?}", text)))?;
                }
                _ => tracing::warn!("忽略未知的 CSV 选项: {}", key),
            }
        }
        if parsed.field_separator == parsed.enclose_string {
            return Err(TransferError::invalid_option(
                Self::ENCLOSE_STRING,
                "不能与分隔符相同",
            ));
        }
        Ok(parsed)
    }
}

fn single_char(
    key: &str,
    value: &str,
) -> TransferResult<u8> {
    if value == "\\t" {
        return Ok(b'\t');
    }
    match value.as_bytes() {
        [byte] if byte.is_ascii() && *byte != b'\n' && *byte != b'\r' => Ok(*byte),
        _ => Err(TransferError::invalid_option(
            key,
            format!("需要单个 ASCII 字符，实际为 {:?}", value),
        )),
    }
}

/// 首行推断出的格式与前两行数据，第二行只用作样例值
struct Inspection {
    dialect: Dialect,
    has_header: bool,
    first: Option<StringRecord>,
    second: Option<StringRecord>,
}

fn inspect(path: &Path) -> TransferResult<Inspection> {
    let mut sample = String::new();
    BufReader::new(File::open(path)?).read_line(&mut sample)?;
    if sample.trim().is_empty() {
        return Err(TransferError::DialectDetection("文件首行为空".into()));
    }
    let dialect = sniff(&sample)?;

    let mut reader = dialect.reader_builder().from_path(path)?;
    let mut records = reader.records();
    let first = records.next().transpose()?;
    let second = records.next().transpose()?;

    let header = first
        .as_ref()
        .is_some_and(|record| has_header(&record.iter().map(str::to_string).collect::<Vec<_>>()));

    Ok(Inspection {
        dialect,
        has_header: header,
        first,
        second,
    })
}

pub struct CsvFormat {
    session: Box<dyn DatabaseSession>,
    request: Option<TransferRequest>,
    options: CsvOptions,
    progress: Arc<Progress>,
    analyzed: Option<PathBuf>,
}

impl CsvFormat {
    pub fn new(session: Box<dyn DatabaseSession>) -> Self {
        Self {
            session,
            request: None,
            options: CsvOptions::default(),
            progress: Progress::new(),
            analyzed: None,
        }
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    fn export_remote(
        &mut self,
        request: &TransferRequest,
    ) -> TransferResult<TransferOutcome> {
        let sql = self.export_query(request)?;
        tracing::info!("服务端导出: {}", sql);
        self.session.exec(&sql).map_err(TransferError::Command)?;
        Ok(TransferOutcome::Completed)
    }
}

impl FormatModule for CsvFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Csv
    }

    fn allows_remote(&self) -> bool {
        true
    }

    fn configure(
        &mut self,
        request: TransferRequest,
    ) -> TransferResult<()> {
        request.validate()?;
        if !request.local && request.raw_query().is_some() {
            return Err(TransferError::InvalidRequest("服务端导出不支持自定义查询".into()));
        }
        self.options = CsvOptions::from_options(&request.format_options)?;
        self.request = Some(request);
        Ok(())
    }

    fn request(&self) -> Option<&TransferRequest> {
        self.request.as_ref()
    }

    fn analyze_source(
        &mut self,
        path: &Path,
    ) -> TransferResult<Vec<ColumnDescriptor>> {
        self.analyzed = None;
        let inspection = inspect(path)?;
        let Some(first) = inspection.first else {
            return Err(TransferError::MalformedSource("文件没有数据".into()));
        };

        let columns = if inspection.has_header {
            first
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    let sample = inspection.second.as_ref().and_then(|r| r.get(idx)).map(str::to_string);
                    ColumnDescriptor::text(name).with_sample(sample)
                })
                .collect::<Vec<_>>()
        } else {
            first
                .iter()
                .enumerate()
                .map(|(idx, value)| ColumnDescriptor::text(format!("column{}", idx + 1)).with_sample(Some(value.into())))
                .collect()
        };

        tracing::info!(
            "分析完成: {} 列, 分隔符 {:?}, 表头 {}",
            columns.len(),
            inspection.dialect.delimiter as char,
            inspection.has_header
        );
        self.analyzed = Some(path.to_path_buf());
        Ok(columns)
    }

    fn is_analyzed(&self) -> bool {
        self.analyzed.is_some()
    }

    fn export_query(
        &self,
        request: &TransferRequest,
    ) -> TransferResult<String> {
        let mut sql = build_export_query(request)?;
        if !request.local {
            if request.raw_query().is_some() {
                return Err(TransferError::InvalidRequest("服务端导出不支持自定义查询".into()));
            }
            sql.push_str(&into_outfile(
                &request.file_path.to_string_lossy(),
                self.options.field_separator as char,
                self.options.enclose_string as char,
                self.options.line_separator.as_str(),
            ));
        }
        Ok(sql)
    }

    fn start_export(
        &mut self,
        cancel: &CancelToken,
    ) -> TransferResult<TransferOutcome> {
        let request = configured(self.request.as_ref())?.clone();
        self.progress.reset();
        if !request.local {
            return self.export_remote(&request);
        }

        let sql = self.export_query(&request)?;
        tracing::info!("导出查询: {}", sql);
        let mut cursor = self.session.query(&sql).map_err(TransferError::Query)?;
        self.progress.set_max(cursor.row_count() as u64);

        let columns = export_columns(&request, &cursor);
        let output = open_output(&request.file_path)?;
        let outcome = export_rows(&mut cursor, &columns, output, &self.options, cancel, &self.progress)?;
        tracing::info!(
            "导出结束: {:?}, 共 {} 行, 文件 {}",
            outcome,
            self.progress.snapshot().current_row,
            request.file_path.display()
        );
        Ok(outcome)
    }

    fn start_import(
        &mut self,
        cancel: &CancelToken,
    ) -> TransferResult<TransferOutcome> {
        let request = configured(self.request.as_ref())?;
        if self.analyzed.as_deref() != Some(request.file_path.as_path()) {
            return Err(TransferError::NotAnalyzed);
        }
        self.progress.reset();

        let inspection = inspect(&request.file_path)?;
        let plan = prepare_target(&mut *self.session, request)?;
        let mut insert = PreparedInsert::prepare(&mut *self.session, plan)?;

        let mut reader = inspection.dialect.reader_builder().from_path(&request.file_path)?;
        let mut records = reader.records().skip(usize::from(inspection.has_header));
        let mut outcome = TransferOutcome::Completed;

        loop {
            if cancel.is_cancelled() {
                outcome = TransferOutcome::Cancelled;
                break;
            }
            let Some(record) = records.next() else {
                break;
            };
            let row = match record {
                Ok(record) => insert
                    .columns()
                    .iter()
                    .map(|col| {
                        record
                            .get(col.source_index)
                            .map(|value| Some(value.to_string()))
                            .ok_or_else(|| format!("缺少第 {} 列 {}", col.source_index + 1, col.source_name))
                    })
                    .collect::<Result<Vec<_>, _>>(),
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => Err(err.to_string()),
            };
            insert.insert(row);
            self.progress.set_current(insert.rows_read());
        }

        if outcome == TransferOutcome::Completed {
            self.progress.set_max(insert.rows_read());
        }
        let summary = insert.finish();
        tracing::info!(
            "导入结束: {:?}, 读取 {} 行, 成功 {} 行, 失败 {} 行",
            outcome,
            summary.rows_read,
            summary.rows_imported,
            summary.rows_failed
        );
        Ok(outcome)
    }

    fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }
}

/// 逐行写出，每行后 flush，取消时保留已写出的内容
///
/// 数值列原样输出，其余字段一律加引号，NULL 输出为空。
fn export_rows<W: Write>(
    cursor: &mut RowCursor,
    columns: &[ColumnDescriptor],
    output: W,
    options: &CsvOptions,
    cancel: &CancelToken,
    progress: &Progress,
) -> TransferResult<TransferOutcome> {
    let mut writer = WriterBuilder::new()
        .delimiter(options.field_separator)
        .terminator(options.line_separator.terminator())
        .quote_style(QuoteStyle::Never)
        .from_writer(output);
    let quote = options.enclose_string;

    writer.write_record(columns.iter().map(|col| enclose(&col.name, quote)))?;
    writer.flush()?;

    let mut written = 0;
    let mut has_row = cursor.first_row();
    while has_row {
        if cancel.is_cancelled() {
            writer.flush()?;
            return Ok(TransferOutcome::Cancelled);
        }
        let values = cursor.current_values().unwrap_or_default();
        let record = values
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                let class = columns.get(idx).and_then(|col| col.classification);
                let text = render_cell(value);
                match value {
                    // 单列的空行会被读取端跳过
                    CellValue::Null if values.len() == 1 => enclose("", quote),
                    _ if writes_bare(class, value) => text,
                    _ => enclose(&text, quote),
                }
            })
            .collect::<Vec<_>>();
        writer.write_record(&record)?;
        writer.flush()?;

        written += 1;
        progress.set_current(written);
        has_row = cursor.next_row();
    }
    writer.flush()?;
    Ok(TransferOutcome::Completed)
}

/// 是否不加引号输出
///
/// 列类型未知时按值本身的类型判断。
fn writes_bare(
    class: Option<ColumnClass>,
    value: &CellValue,
) -> bool {
    match value {
        CellValue::Null => true,
        CellValue::Int(_) | CellValue::Float(_) => class.is_none_or(|class| class.is_numeric()),
        CellValue::Text(text) => {
            class.is_some_and(|class| class.is_numeric()) && text.trim().parse::<f64>().is_ok()
        }
        CellValue::Bytes(_) => false,
    }
}

/// 用引号包住字段，字段内的引号写两次
fn enclose(
    text: &str,
    quote: u8,
) -> String {
    let quote = quote as char;
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        if ch == quote {
            out.push(quote);
        }
        out.push(ch);
    }
    out.push(quote);
    out
}
