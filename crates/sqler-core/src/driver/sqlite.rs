use std::{collections::HashMap, fs, path::Path};

use rusqlite::{Connection, OpenFlags, params_from_iter, types::ValueRef};

use crate::{ColumnInfo, SQLiteOptions};

use super::{
    CellValue, CursorColumn, DatabaseDriver, DatabaseSession, DriverError, ExecResp, RowCursor, StatementId,
    escape_quote, split_table, validate_sql,
};

#[derive(Debug, Clone, Copy)]
pub struct SQLiteDriver;

struct SQLiteConnection {
    conn: Connection,
    statements: HashMap<StatementId, String>,
    next_stmt: u32,
}

impl SQLiteConnection {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            statements: HashMap::new(),
            next_stmt: 0,
        }
    }
}

impl DatabaseSession for SQLiteConnection {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        tracing::debug!(sql = %sql);
        let affected = self
            .conn
            .execute(sql, [])
            .map_err(|err| DriverError::Command(err.to_string()))?;
        Ok(ExecResp {
            affected: affected as u64,
        })
    }

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<RowCursor, DriverError> {
        validate_sql(sql)?;
        tracing::debug!(sql = %sql);

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|err| DriverError::Query(format!("准备查询失败: {}", err)))?;
        let names = stmt.column_names().iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let mut rows = stmt
            .query([])
            .map_err(|err| DriverError::Query(format!("执行查询失败: {}", err)))?;

        let mut records = vec![];
        while let Some(row) = rows
            .next()
            .map_err(|err| DriverError::Query(format!("读取结果失败: {}", err)))?
        {
            let mut record = Vec::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|err| DriverError::Query(format!("读取列 {name} 失败: {}", err)))?;
                record.push(parse_value(value));
            }
            records.push(record);
        }

        // SQLite 为动态类型，取每列第一个非 NULL 值的存储类型作为列类型
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let kind = records
                    .iter()
                    .map(|record| &record[idx])
                    .find(|value| !value.is_null())
                    .map(storage_class)
                    .unwrap_or("text");
                CursorColumn {
                    name,
                    kind: kind.to_string(),
                }
            })
            .collect();

        Ok(RowCursor::new(columns, records))
    }

    fn columns(
        &mut self,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, DriverError> {
        let sql = match split_table(table) {
            (Some(schema), name) => format!(
                "PRAGMA \"{}\".table_info(\"{}\")",
                escape_quote(schema),
                escape_quote(name)
            ),
            (None, name) => format!("PRAGMA table_info(\"{}\")", escape_quote(name)),
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| DriverError::Query(format!("查询列信息失败: {}", err)))?;

        let mut columns = vec![];
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i32>(5)?,
                ))
            })
            .map_err(|err| DriverError::Query(format!("查询列信息失败: {}", err)))?;

        for row in rows {
            let (name, data_type, notnull, default_value, pk) =
                row.map_err(|err| DriverError::Query(format!("读取列信息失败: {}", err)))?;

            columns.push(ColumnInfo {
                name,
                kind: data_type,
                comment: String::new(),
                nullable: notnull == 0,
                primary_key: pk > 0,
                default_value: default_value.unwrap_or_default(),
                max_length: 0,
                auto_increment: false,
            });
        }
        Ok(columns)
    }

    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<StatementId, DriverError> {
        validate_sql(sql)?;
        tracing::debug!(sql = %sql, "预编译语句");

        // 放入连接的语句缓存，后续 execute 直接复用
        self.conn
            .prepare_cached(sql)
            .map_err(|err| DriverError::Prepare(err.to_string()))?;

        let id = StatementId::new(self.next_stmt);
        self.next_stmt += 1;
        self.statements.insert(id, sql.to_string());
        Ok(id)
    }

    fn execute(
        &mut self,
        stmt: StatementId,
        params: &[Option<String>],
    ) -> Result<ExecResp, DriverError> {
        let sql = self
            .statements
            .get(&stmt)
            .ok_or(DriverError::UnknownStatement(stmt))?;
        let mut cached = self
            .conn
            .prepare_cached(sql)
            .map_err(|err| DriverError::Prepare(err.to_string()))?;
        let affected = cached
            .execute(params_from_iter(params.iter()))
            .map_err(|err| DriverError::Command(err.to_string()))?;
        Ok(ExecResp {
            affected: affected as u64,
        })
    }

    fn deallocate(
        &mut self,
        stmt: StatementId,
    ) -> Result<(), DriverError> {
        self.statements
            .remove(&stmt)
            .ok_or(DriverError::UnknownStatement(stmt))?;
        if self.statements.is_empty() {
            self.conn.flush_prepared_statement_cache();
        }
        Ok(())
    }
}

impl DatabaseDriver for SQLiteDriver {
    type Config = SQLiteOptions;

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let conn = open_conn(config)?;
        Ok(Box::new(SQLiteConnection::new(conn)))
    }
}

fn open_conn(config: &SQLiteOptions) -> Result<Connection, DriverError> {
    let path_str = config.filepath.trim();
    if path_str.is_empty() {
        return Err(DriverError::MissingField("file_path".into()));
    }

    let path = Path::new(path_str);

    if config.readonly {
        if !path.exists() {
            return Err(DriverError::InvalidField("file_path 不存在".into()));
        }
    } else if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| DriverError::Other(format!("创建目录失败: {}", err)))?;
        }
    }

    let flags = if config.readonly {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    };

    Connection::open_with_flags(path, flags).map_err(|err| DriverError::Other(format!("打开 SQLite 失败: {}", err)))
}

fn parse_value(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(int) => CellValue::Int(int),
        ValueRef::Real(real) => CellValue::Float(real),
        ValueRef::Text(text) => CellValue::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => CellValue::Bytes(blob.to_vec()),
    }
}

fn storage_class(value: &CellValue) -> &'static str {
    match value {
        CellValue::Int(_) => "integer",
        CellValue::Float(_) => "real",
        CellValue::Bytes(_) => "blob",
        CellValue::Null | CellValue::Text(_) => "text",
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open_session(dir: &TempDir) -> Box<dyn DatabaseSession> {
        let path = dir.path().join("test.db");
        let opts = SQLiteOptions::new(path.to_string_lossy());
        SQLiteDriver.create_connection(&opts).unwrap()
    }

    #[test]
    fn query_returns_typed_cursor() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);
        session
            .exec("CREATE TABLE items (id INTEGER, name TEXT, price REAL, raw BLOB)")
            .unwrap();
        session
            .exec("INSERT INTO items VALUES (1, 'pen', 1.5, x'0aff'), (2, NULL, 3.0, NULL)")
            .unwrap();

        let mut cursor = session.query("SELECT id, name, price, raw FROM items ORDER BY id").unwrap();
        assert_eq!(cursor.row_count(), 2);
        let kinds: Vec<_> = cursor.columns().iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, ["integer", "text", "real", "blob"]);

        assert!(cursor.first_row());
        assert_eq!(cursor.int_by_name("id"), Some(1));
        assert_eq!(cursor.string_by_name("name").as_deref(), Some("pen"));
        assert_eq!(cursor.string_by_name("raw").as_deref(), Some("0aff"));
        assert!(cursor.next_row());
        assert_eq!(cursor.string_by_name("name"), None);
        assert!(!cursor.next_row());
    }

    #[test]
    fn prepared_statement_is_reused() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);
        session.exec("CREATE TABLE t (a TEXT UNIQUE, b TEXT)").unwrap();

        let stmt = session.prepare("INSERT INTO t (a, b) VALUES (?, ?)").unwrap();
        session.execute(stmt, &[Some("1".into()), Some("x".into())]).unwrap();
        session.execute(stmt, &[Some("2".into()), None]).unwrap();
        // 违反唯一约束只影响本次执行
        assert!(session.execute(stmt, &[Some("1".into()), None]).is_err());
        session.execute(stmt, &[Some("3".into()), None]).unwrap();
        session.deallocate(stmt).unwrap();

        assert!(matches!(
            session.execute(stmt, &[]),
            Err(DriverError::UnknownStatement(_))
        ));
        let cursor = session.query("SELECT a FROM t").unwrap();
        assert_eq!(cursor.row_count(), 3);
    }

    #[test]
    fn prepare_reports_invalid_sql() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);
        let err = session.prepare("INSERT INTO missing (a) VALUES (?)").unwrap_err();
        assert!(matches!(err, DriverError::Prepare(_)));
    }

    #[test]
    fn columns_reads_declared_types() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);
        session
            .exec("CREATE TABLE people (id INTEGER PRIMARY KEY, name VARCHAR(20) NOT NULL)")
            .unwrap();

        let columns = session.columns("people").unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].kind, "INTEGER");
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].kind, "VARCHAR(20)");
        assert!(!columns[1].nullable);

        let qualified = session.columns("main.people").unwrap();
        assert_eq!(qualified.len(), 2);
    }
}
