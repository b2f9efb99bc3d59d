use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    column::{ColumnDescriptor, ColumnMapping},
    error::{TransferError, TransferResult},
};

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Export, // DB -> 文件
    Import, // 文件 -> DB
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.schema.as_deref().filter(|s| !s.is_empty()) {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// 格式选项的值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl OptionValue {
    pub fn as_text(&self) -> String {
        match self {
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Int(i) => i.to_string(),
            OptionValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

/// 一次传输的完整配置，启动后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub direction: Direction,
    #[serde(default)]
    pub table: Option<TableRef>,
    #[serde(default)]
    pub create_table: bool,
    pub file_path: PathBuf,
    /// 导出列
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    /// 导入映射
    #[serde(default)]
    pub mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// 自定义查询，设置后忽略 table 与 columns
    #[serde(default)]
    pub raw_query: Option<String>,
    /// false 表示由数据库服务端写文件
    #[serde(default = "default_local")]
    pub local: bool,
    #[serde(default)]
    pub format_options: BTreeMap<String, OptionValue>,
}

fn default_local() -> bool {
    true
}

impl TransferRequest {
    fn base(
        direction: Direction,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            direction,
            table: None,
            create_table: false,
            file_path: file_path.into(),
            columns: vec![],
            mappings: vec![],
            limit: None,
            offset: None,
            raw_query: None,
            local: true,
            format_options: BTreeMap::new(),
        }
    }

    pub fn export(
        table: TableRef,
        columns: Vec<ColumnDescriptor>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            table: Some(table),
            columns,
            ..Self::base(Direction::Export, file_path)
        }
    }

    pub fn export_query(
        raw_query: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            raw_query: Some(raw_query.into()),
            ..Self::base(Direction::Export, file_path)
        }
    }

    pub fn import(
        table: TableRef,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            table: Some(table),
            ..Self::base(Direction::Import, file_path)
        }
    }

    pub fn with_mappings(
        mut self,
        mappings: Vec<ColumnMapping>,
    ) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_create_table(
        mut self,
        create_table: bool,
    ) -> Self {
        self.create_table = create_table;
        self
    }

    pub fn with_limit(
        mut self,
        limit: u64,
    ) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(
        mut self,
        offset: u64,
    ) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_local(
        mut self,
        local: bool,
    ) -> Self {
        self.local = local;
        self
    }

    pub fn with_option(
        mut self,
        key: impl Into<String>,
        value: impl Into<OptionValue>,
    ) -> Self {
        self.format_options.insert(key.into(), value.into());
        self
    }

    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    /// 校验与格式无关的约束
    pub fn validate(&self) -> TransferResult<()> {
        if self.file_path.as_os_str().is_empty() {
            return Err(TransferError::InvalidRequest("缺少文件路径".into()));
        }

        match self.direction {
            Direction::Export => {
                let has_table = self.table.is_some() && !self.columns.is_empty();
                match (self.raw_query().is_some(), has_table) {
                    (true, true) => Err(TransferError::InvalidRequest(
                        "自定义查询与表导出不能同时指定".into(),
                    )),
                    (false, false) => Err(TransferError::InvalidRequest("缺少导出表或查询语句".into())),
                    _ => Ok(()),
                }
            }
            Direction::Import => {
                if self.table.is_none() {
                    return Err(TransferError::InvalidRequest("缺少目标表".into()));
                }
                let mut active = self.mappings.iter().filter(|m| m.active).peekable();
                if active.peek().is_none() {
                    return Err(TransferError::InvalidRequest("没有选择任何导入列".into()));
                }
                if !self.create_table {
                    if let Some(mapping) = active.find(|m| m.dest_column.trim().is_empty()) {
                        return Err(TransferError::InvalidRequest(format!(
                            "源列 {} 未指定目标列",
                            mapping.source_name
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}
