use std::fmt::Write;

/// 单元格的值，保留驱动返回的基本类型
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// 以字符串读取，NULL 返回 None，二进制显示为十六进制
    pub fn as_string(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Int(int) => Some(int.to_string()),
            CellValue::Float(float) => Some(float.to_string()),
            CellValue::Text(text) => Some(text.clone()),
            CellValue::Bytes(bytes) => {
                let mut hex = String::with_capacity(bytes.len() * 2);
                for b in bytes {
                    let _ = write!(hex, "{:02x}", b);
                }
                Some(hex)
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CellValue::Int(int) => Some(*int),
            CellValue::Float(float) if float.fract() == 0.0 => Some(*float as i64),
            CellValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CellValue::Int(int) => Some(*int as f64),
            CellValue::Float(float) => Some(*float),
            CellValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// 结果集的列
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorColumn {
    pub name: String,
    /// 驱动给出的类型名（小写），如 `int`、`varchar`、`blob`
    pub kind: String,
}

/// 查询结果游标
///
/// 结果由驱动一次性读取完成，因此总行数在迭代前即可得知。
/// 使用方式与服务端结果集一致：`first_row` 定位到第一行，之后反复 `next_row`，
/// 两者返回 false 表示没有更多数据。
#[derive(Clone, Debug, Default)]
pub struct RowCursor {
    columns: Vec<CursorColumn>,
    rows: Vec<Vec<CellValue>>,
    position: Option<usize>,
}

impl RowCursor {
    pub fn new(
        columns: Vec<CursorColumn>,
        rows: Vec<Vec<CellValue>>,
    ) -> Self {
        Self {
            columns,
            rows,
            position: None,
        }
    }

    pub fn columns(&self) -> &[CursorColumn] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn first_row(&mut self) -> bool {
        self.position = Some(0);
        !self.rows.is_empty()
    }

    pub fn next_row(&mut self) -> bool {
        let next = self.position.map_or(0, |pos| pos + 1).min(self.rows.len());
        self.position = Some(next);
        next < self.rows.len()
    }

    /// 当前行号（从 0 开始），未定位或已越过末尾时为 None
    pub fn current_row(&self) -> Option<usize> {
        self.position.filter(|pos| *pos < self.rows.len())
    }

    /// 当前行的全部值，顺序与 `columns` 一致
    pub fn current_values(&self) -> Option<&[CellValue]> {
        self.rows.get(self.current_row()?).map(Vec::as_slice)
    }

    pub fn value_by_name(
        &self,
        name: &str,
    ) -> Option<&CellValue> {
        let idx = self.columns.iter().position(|col| col.name == name)?;
        self.current_values()?.get(idx)
    }

    pub fn string_by_name(
        &self,
        name: &str,
    ) -> Option<String> {
        self.value_by_name(name).and_then(CellValue::as_string)
    }

    pub fn int_by_name(
        &self,
        name: &str,
    ) -> Option<i64> {
        self.value_by_name(name).and_then(CellValue::as_int)
    }

    pub fn float_by_name(
        &self,
        name: &str,
    ) -> Option<f64> {
        self.value_by_name(name).and_then(CellValue::as_float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowCursor {
        RowCursor::new(
            vec![
                CursorColumn {
                    name: "id".into(),
                    kind: "int".into(),
                },
                CursorColumn {
                    name: "price".into(),
                    kind: "double".into(),
                },
                CursorColumn {
                    name: "raw".into(),
                    kind: "blob".into(),
                },
            ],
            vec![
                vec![CellValue::Int(1), CellValue::Float(2.5), CellValue::Bytes(vec![0xde, 0xad])],
                vec![CellValue::Text("7".into()), CellValue::Null, CellValue::Null],
            ],
        )
    }

    #[test]
    fn cursor_walks_rows_in_order() {
        let mut cursor = sample();
        assert_eq!(cursor.row_count(), 2);
        assert_eq!(cursor.current_row(), None);
        assert!(cursor.value_by_name("id").is_none());

        assert!(cursor.first_row());
        assert_eq!(cursor.current_row(), Some(0));
        assert_eq!(cursor.int_by_name("id"), Some(1));
        assert_eq!(cursor.float_by_name("price"), Some(2.5));
        assert_eq!(cursor.string_by_name("raw").as_deref(), Some("dead"));

        assert!(cursor.next_row());
        assert_eq!(cursor.current_values().map(|v| v.len()), Some(3));
        assert_eq!(cursor.int_by_name("id"), Some(7));
        assert_eq!(cursor.string_by_name("price"), None);

        assert!(!cursor.next_row());
        assert_eq!(cursor.current_row(), None);
        assert!(!cursor.next_row());
    }

    #[test]
    fn empty_cursor_has_no_first_row() {
        let mut cursor = RowCursor::new(vec![], vec![]);
        assert!(!cursor.first_row());
        assert!(!cursor.next_row());
    }

    #[test]
    fn unknown_column_is_none() {
        let mut cursor = sample();
        cursor.first_row();
        assert!(cursor.value_by_name("missing").is_none());
    }
}
