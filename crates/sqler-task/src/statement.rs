use std::collections::HashSet;

use crate::{
    column::{ColumnDescriptor, ColumnMapping},
    request::TableRef,
};

/// 插入语句中的一列，记录取值来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumn {
    pub dest: String,
    pub source_index: usize,
    pub source_name: String,
}

/// 预编译插入语句及其占位符对应的列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    pub sql: String,
    pub columns: Vec<InsertColumn>,
}

/// 根据列映射生成建表与插入语句
pub struct StatementBuilder<'a> {
    table: &'a TableRef,
    mappings: &'a [ColumnMapping],
}

impl<'a> StatementBuilder<'a> {
    pub fn new(
        table: &'a TableRef,
        mappings: &'a [ColumnMapping],
    ) -> Self {
        Self { table, mappings }
    }

    /// 建表语句覆盖全部映射，列顺序与映射顺序一致
    pub fn create_table(&self) -> String {
        let mut seen = HashSet::new();
        let defs = self
            .mappings
            .iter()
            .filter(|m| seen.insert(dest_name(m).to_string()))
            .map(|m| format!("{} {}", dest_name(m), m.declared_type))
            .collect::<Vec<_>>();
        format!("CREATE TABLE {} ({})", self.table, defs.join(", "))
    }

    /// 只包含启用的映射；目标列重复时以第一个映射为准
    pub fn insert_plan(&self) -> InsertPlan {
        let mut seen = HashSet::new();
        let columns = self
            .mappings
            .iter()
            .filter(|m| m.active)
            .filter(|m| seen.insert(dest_name(m).to_string()))
            .map(|m| InsertColumn {
                dest: dest_name(m).to_string(),
                source_index: m.source_index,
                source_name: m.source_name.clone(),
            })
            .collect::<Vec<_>>();

        let names = columns.iter().map(|c| c.dest.as_str()).collect::<Vec<_>>();
        let placeholders = vec!["?"; columns.len()];
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        );
        InsertPlan { sql, columns }
    }
}

fn dest_name(mapping: &ColumnMapping) -> &str {
    let dest = mapping.dest_column.trim();
    if dest.is_empty() { &mapping.source_name } else { dest }
}

/// 导出查询：`SELECT c1,c2 FROM t [LIMIT n | LIMIT offset,n]`
pub fn select_query(
    columns: &[ColumnDescriptor],
    table: &TableRef,
    limit: Option<u64>,
    offset: Option<u64>,
) -> String {
    let names = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
    let mut sql = format!("SELECT {} FROM {}", names.join(","), table);
    match (limit, offset) {
        (Some(limit), Some(offset)) if offset > 0 => sql.push_str(&format!(" LIMIT {},{}", offset, limit)),
        (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
        (None, _) => {}
    }
    sql
}

/// 服务端写文件子句
pub fn into_outfile(
    path: &str,
    field_separator: char,
    enclose: char,
    line_separator: &str,
) -> String {
    format!(
        " INTO OUTFILE {} FIELDS TERMINATED BY {} ENCLOSED BY {} LINES TERMINATED BY {}",
        sql_literal(path),
        sql_literal(&field_separator.to_string()),
        sql_literal(&enclose.to_string()),
        sql_literal(line_separator)
    )
}

/// 转为单引号字符串字面量
pub fn sql_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}
