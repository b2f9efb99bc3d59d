use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde_json::{Map, Value};

use sqler_core::{DatabaseSession, RowCursor};

use crate::{
    column::ColumnDescriptor,
    error::{TransferError, TransferResult},
    progress::{CancelToken, Progress},
    request::TransferRequest,
};

use super::{
    FormatKind, FormatModule, TransferOutcome, configured, export_columns, insert::PreparedInsert, open_output,
    prepare_target, render_cell,
};

pub struct JsonFormat {
    session: Box<dyn DatabaseSession>,
    request: Option<TransferRequest>,
    progress: Arc<Progress>,
    analyzed: Option<PathBuf>,
}

impl JsonFormat {
    pub fn new(session: Box<dyn DatabaseSession>) -> Self {
        Self {
            session,
            request: None,
            progress: Progress::new(),
            analyzed: None,
        }
    }
}

/// 截取数组中第一个对象的原文
///
/// 文件须以 `[` 开头。全程跟踪字符串状态与花括号深度，不解析其余内容。
fn first_object<R: Read>(reader: R) -> TransferResult<String> {
    let mut captured = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut opened = false;
    for byte in BufReader::new(reader).bytes() {
        let byte = byte?;
        if !opened {
            match byte {
                b'[' => opened = true,
                _ if byte.is_ascii_whitespace() => {}
                _ => return Err(TransferError::MalformedSource("文件不是 JSON 数组".into())),
            }
            continue;
        }
        if depth > 0 {
            captured.push(byte);
        }
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    captured.push(byte);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return String::from_utf8(captured)
                        .map_err(|err| TransferError::MalformedSource(format!("不是有效的 UTF-8: {}", err)));
                }
            }
            _ => {}
        }
    }
    Err(TransferError::MalformedSource("未找到完整的 JSON 对象".into()))
}

/// JSON 值转为绑定参数，嵌套结构保留为紧凑 JSON 文本
fn bind_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

impl FormatModule for JsonFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Json
    }

    fn allows_remote(&self) -> bool {
        false
    }

    fn configure(
        &mut self,
        request: TransferRequest,
    ) -> TransferResult<()> {
        request.validate()?;
        if !request.local {
            return Err(TransferError::InvalidRequest("JSON 不支持服务端导出".into()));
        }
        for key in request.format_options.keys() {
            tracing::warn!("JSON 没有可配置的选项，忽略: {}", key);
        }
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
        let fragment = first_object(File::open(path)?)?;

        let wrapped = format!("[{}]", fragment);
        let sample: Vec<Value> = serde_json::from_str(&wrapped)
            .map_err(|err| TransferError::MalformedSource(format!("首个对象解析失败: {}", err)))?;
        let object = match sample.as_slice() {
            [Value::Object(object)] => object,
            _ => return Err(TransferError::MalformedSource("首个元素不是对象".into())),
        };

        let columns = object
            .iter()
            .map(|(key, value)| ColumnDescriptor::text(key.clone()).with_sample(bind_value(value)))
            .collect::<Vec<_>>();
        tracing::info!("分析完成: {} 列", columns.len());
        self.analyzed = Some(path.to_path_buf());
        Ok(columns)
    }

    fn is_analyzed(&self) -> bool {
        self.analyzed.is_some()
    }

    fn start_export(
        &mut self,
        cancel: &CancelToken,
    ) -> TransferResult<TransferOutcome> {
        let request = configured(self.request.as_ref())?;
        self.progress.reset();

        let sql = self.export_query(request)?;
        tracing::info!("导出查询: {}", sql);
        let mut cursor = self.session.query(&sql).map_err(TransferError::Query)?;
        self.progress.set_max(cursor.row_count() as u64);

        let columns = export_columns(request, &cursor);
        let output = open_output(&request.file_path)?;
        let outcome = export_objects(&mut cursor, &columns, output, cancel, &self.progress)?;
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

        // 整个文件一次读入
        let content = fs::read_to_string(&request.file_path)?;
        let elements: Vec<Value> = serde_json::from_str(&content)
            .map_err(|err| TransferError::MalformedSource(format!("文件不是 JSON 数组: {}", err)))?;
        self.progress.set_max(elements.len() as u64);

        let plan = prepare_target(&mut *self.session, request)?;
        let mut insert = PreparedInsert::prepare(&mut *self.session, plan)?;
        let mut outcome = TransferOutcome::Completed;

        for element in &elements {
            if cancel.is_cancelled() {
                outcome = TransferOutcome::Cancelled;
                break;
            }
            let row = match element.as_object() {
                Some(object) => insert
                    .columns()
                    .iter()
                    .map(|col| {
                        object
                            .get(&col.source_name)
                            .map(bind_value)
                            .ok_or_else(|| format!("缺少字段 {}", col.source_name))
                    })
                    .collect::<Result<Vec<_>, _>>(),
                None => Err("元素不是对象".to_string()),
            };
            insert.insert(row);
            self.progress.set_current(insert.rows_read());
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

/// 写出对象数组，所有值按字符串输出；取消时同样补上结尾的 `]`
fn export_objects<W: Write>(
    cursor: &mut RowCursor,
    columns: &[ColumnDescriptor],
    mut output: W,
    cancel: &CancelToken,
    progress: &Progress,
) -> TransferResult<TransferOutcome> {
    let mut seen = HashSet::new();
    let kept = columns
        .iter()
        .enumerate()
        .filter(|(_, col)| seen.insert(col.name.as_str()))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    if kept.len() < columns.len() {
        tracing::warn!("结果中有重复的列名，只保留第一次出现的列");
    }

    let mut outcome = TransferOutcome::Completed;
    let mut written = 0u64;

    output.write_all(b"[")?;
    let mut has_row = cursor.first_row();
    while has_row {
        if cancel.is_cancelled() {
            outcome = TransferOutcome::Cancelled;
            break;
        }
        let values = cursor.current_values().unwrap_or_default();
        let object = kept
            .iter()
            .filter_map(|&idx| {
                let value = values.get(idx)?;
                Some((columns[idx].name.clone(), Value::String(render_cell(value))))
            })
            .collect::<Map<_, _>>();

        if written > 0 {
            output.write_all(b", ")?;
        }
        serde_json::to_writer(&mut output, &object)?;
        output.flush()?;

        written += 1;
        progress.set_current(written);
        has_row = cursor.next_row();
    }
    output.write_all(b"]")?;
    output.flush()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use sqler_core::{CellValue, CursorColumn};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        column::{ColumnMapping, describe_cursor},
        request::{Direction, TableRef},
        testing::RecordingSession,
    };

    fn write_file(
        dir: &TempDir,
        name: &str,
        content: &str,
    ) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn first_object_tracks_strings_and_depth() {
        let text = r#"  [{"a": "x}y", "b": {"c": "\"}"}}, {"a": "z"}]"#;
        assert_eq!(
            first_object(text.as_bytes()).unwrap(),
            r#"{"a": "x}y", "b": {"c": "\"}"}}"#
        );
        assert!(first_object(r#"[{"a": "1""#.as_bytes()).is_err());
        assert!(first_object("[]".as_bytes()).is_err());
    }

    #[test]
    fn first_object_skips_braces_in_top_level_strings() {
        let text = r#"["{\"a\":1}", "}", {"b": "2"}]"#;
        assert_eq!(first_object(text.as_bytes()).unwrap(), r#"{"b": "2"}"#);
    }

    #[test]
    fn first_object_requires_array() {
        assert!(matches!(
            first_object(r#" {"a": "1"}"#.as_bytes()),
            Err(TransferError::MalformedSource(_))
        ));
        assert_eq!(first_object("\n [{\"a\": 1}]".as_bytes()).unwrap(), r#"{"a": 1}"#);

        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "bare.json", r#"{"a": "1"}"#);
        let mut module = JsonFormat::new(Box::new(RecordingSession::default()));
        assert!(module.analyze_source(&path).is_err());
        assert!(!module.is_analyzed());
    }

    #[test]
    fn analyze_reads_first_object_keys() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.json", r#"[{"b": 1, "a": "x", "n": null}, {"c": 2}]"#);

        let mut module = JsonFormat::new(Box::new(RecordingSession::default()));
        let columns = module.analyze_source(&path).unwrap();

        let names = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["b", "a", "n"]);
        assert_eq!(columns[0].sample_value.as_deref(), Some("1"));
        assert_eq!(columns[2].sample_value, None);
        assert!(columns.iter().all(|c| c.source_type == "varchar"));
    }

    #[test]
    fn malformed_source_blocks_import() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "bad.json", r#"[{"a": "1", "b": {"c": "2"}]"#);

        let mut module = JsonFormat::new(Box::new(RecordingSession::default()));
        assert!(matches!(
            module.analyze_source(&path),
            Err(TransferError::MalformedSource(_))
        ));
        assert!(!module.is_analyzed());

        let request = TransferRequest::import(TableRef::new("t"), &path)
            .with_mappings(ColumnMapping::identity(&[ColumnDescriptor::text("a")]));
        module.configure(request).unwrap();
        assert!(matches!(
            module.start(&CancelToken::new()),
            Err(TransferError::NotAnalyzed)
        ));
    }

    #[test]
    fn import_attempts_every_row_after_failure() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "rows.json", r#"[{"a":"1","b":"2"},{"a":"3","b":"4"}]"#);

        let session = RecordingSession::default().fail_execution(0);
        let log = session.log();
        let mut module = JsonFormat::new(Box::new(session));
        let columns = module.analyze_source(&path).unwrap();

        let request = TransferRequest::import(TableRef::new("t"), &path).with_mappings(ColumnMapping::identity(&columns));
        assert_eq!(request.direction, Direction::Import);
        module.configure(request).unwrap();

        assert_eq!(module.start(&CancelToken::new()).unwrap(), TransferOutcome::Completed);
        assert_eq!(module.progress().snapshot(), crate::progress::ProgressSnapshot {
            current_row: 2,
            max_row: 2,
        });
        let executes = log.statements().iter().filter(|s| s.starts_with("EXECUTE")).count();
        assert_eq!(executes, 2);
        assert_eq!(log.params()[1], vec![Some("3".to_string()), Some("4".to_string())]);
    }

    #[test]
    fn import_binds_json_values() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "values.json",
            r#"[{"s": "x", "n": 1.5, "t": true, "z": null, "o": {"k": [1, 2]}}, {"s": "only"}, 7]"#,
        );

        let session = RecordingSession::default();
        let log = session.log();
        let mut module = JsonFormat::new(Box::new(session));
        let columns = module.analyze_source(&path).unwrap();
        let request = TransferRequest::import(TableRef::new("t"), &path).with_mappings(ColumnMapping::identity(&columns));
        module.configure(request).unwrap();
        module.start(&CancelToken::new()).unwrap();

        // 后两个元素缺字段或不是对象，只执行第一行
        assert_eq!(
            log.params(),
            [vec![
                Some("x".to_string()),
                Some("1.5".to_string()),
                Some("true".to_string()),
                None,
                Some(r#"{"k":[1,2]}"#.to_string()),
            ]]
        );
        assert_eq!(module.progress().snapshot().current_row, 3);
    }

    #[test]
    fn export_writes_string_values() {
        let mut cursor = RowCursor::new(
            vec![
                CursorColumn {
                    name: "id".into(),
                    kind: "int".into(),
                },
                CursorColumn {
                    name: "note".into(),
                    kind: "text".into(),
                },
            ],
            vec![
                vec![CellValue::Int(1), CellValue::Text("a\"b".into())],
                vec![CellValue::Int(2), CellValue::Null],
            ],
        );
        let mut out = vec![];
        let columns = describe_cursor(&cursor);
        let outcome = export_objects(&mut cursor, &columns, &mut out, &CancelToken::new(), &Progress::default()).unwrap();

        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"[{"id":"1","note":"a\"b"}, {"id":"2","note":""}]"#
        );
    }

    #[test]
    fn export_keeps_first_of_repeated_names() {
        let mut cursor = RowCursor::new(
            vec![
                CursorColumn {
                    name: "a".into(),
                    kind: "text".into(),
                },
                CursorColumn {
                    name: "b".into(),
                    kind: "text".into(),
                },
                CursorColumn {
                    name: "a".into(),
                    kind: "text".into(),
                },
            ],
            vec![vec![
                CellValue::Text("first".into()),
                CellValue::Text("mid".into()),
                CellValue::Text("second".into()),
            ]],
        );
        let mut out = vec![];
        let columns = describe_cursor(&cursor);
        export_objects(&mut cursor, &columns, &mut out, &CancelToken::new(), &Progress::default()).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), r#"[{"a":"first","b":"mid"}]"#);
    }

    #[test]
    fn cancelled_export_is_valid_json() {
        let mut cursor = RowCursor::new(
            vec![CursorColumn {
                name: "id".into(),
                kind: "int".into(),
            }],
            vec![vec![CellValue::Int(1)]],
        );
        let token = CancelToken::new();
        token.cancel();
        let mut out = vec![];
        let columns = describe_cursor(&cursor);
        let outcome = export_objects(&mut cursor, &columns, &mut out, &token, &Progress::default()).unwrap();

        assert_eq!(outcome, TransferOutcome::Cancelled);
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn remote_destination_is_rejected() {
        let mut module = JsonFormat::new(Box::new(RecordingSession::default()));
        let request = TransferRequest::export(TableRef::new("t"), vec![ColumnDescriptor::text("a")], "/tmp/a.json")
            .with_local(false);
        assert!(matches!(
            module.configure(request),
            Err(TransferError::InvalidRequest(_))
        ));
    }
}
