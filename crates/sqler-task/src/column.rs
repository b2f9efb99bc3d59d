use serde::{Deserialize, Serialize};

use sqler_core::{DatabaseSession, RowCursor};

use crate::{
    error::{TransferError, TransferResult},
    request::TableRef,
};

/// 列的数据分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnClass {
    String,
    Integer,
    Float,
    Binary,
    DateTime,
}

impl ColumnClass {
    /// 根据声明的类型名归类，无法识别时返回 None
    ///
    /// 匹配顺序有意义：`point` 含有 `int`，`datetime` 含有 `time`。
    pub fn classify(source_type: &str) -> Option<ColumnClass> {
        let lower = source_type.trim().to_lowercase();
        let base = lower.split('(').next().unwrap_or_default().trim();

        if base.is_empty() {
            return None;
        }
        if ["blob", "binary", "geo", "point", "polygon", "linestring"]
            .iter()
            .any(|kw| base.contains(kw))
        {
            return Some(ColumnClass::Binary);
        }
        if base.contains("int") || base == "bit" || base.starts_with("bool") {
            return Some(ColumnClass::Integer);
        }
        if ["real", "float", "double", "decimal", "numeric"]
            .iter()
            .any(|kw| base.contains(kw))
        {
            return Some(ColumnClass::Float);
        }
        if ["date", "time", "year"].iter().any(|kw| base.contains(kw)) {
            return Some(ColumnClass::DateTime);
        }
        if ["char", "text", "string", "json"].iter().any(|kw| base.contains(kw))
            || base.starts_with("enum")
            || base.starts_with("set")
        {
            return Some(ColumnClass::String);
        }
        None
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnClass::Integer | ColumnClass::Float)
    }
}

/// 源端的一列（文件分析或表结构得到）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub source_type: String,
    #[serde(default)]
    pub classification: Option<ColumnClass>,
    #[serde(default)]
    pub sample_value: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(
        name: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        let source_type = source_type.into();
        Self {
            name: name.into(),
            classification: ColumnClass::classify(&source_type),
            source_type,
            sample_value: None,
        }
    }

    /// 文件中的列一律按文本处理
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: "varchar".into(),
            classification: Some(ColumnClass::String),
            sample_value: None,
        }
    }

    pub fn with_sample(
        mut self,
        sample: Option<String>,
    ) -> Self {
        self.sample_value = sample;
        self
    }
}

/// 导入时源列到目标列的映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_index: usize,
    pub source_name: String,
    #[serde(default)]
    pub dest_column: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub declared_type: String,
}

fn default_active() -> bool {
    true
}

impl ColumnMapping {
    /// 按源列原样映射，目标列与源列同名
    pub fn identity(columns: &[ColumnDescriptor]) -> Vec<ColumnMapping> {
        columns
            .iter()
            .enumerate()
            .map(|(idx, col)| ColumnMapping {
                source_index: idx,
                source_name: col.name.clone(),
                dest_column: col.name.clone(),
                active: true,
                declared_type: col.source_type.clone(),
            })
            .collect()
    }
}

/// 读取表结构作为导出列
pub fn describe_table(
    session: &mut dyn DatabaseSession,
    table: &TableRef,
) -> TransferResult<Vec<ColumnDescriptor>> {
    let columns = session
        .columns(&table.to_string())
        .map_err(TransferError::Query)?;
    Ok(columns
        .into_iter()
        .map(|col| ColumnDescriptor::new(col.name, col.kind))
        .collect())
}

/// 从查询结果的列生成描述，用于自定义查询导出
pub fn describe_cursor(cursor: &RowCursor) -> Vec<ColumnDescriptor> {
    cursor
        .columns()
        .iter()
        .map(|col| ColumnDescriptor::new(col.name.clone(), col.kind.clone()))
        .collect()
}
