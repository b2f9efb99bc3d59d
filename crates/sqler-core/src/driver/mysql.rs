use std::collections::HashMap;

use mysql::{Conn, Opts, OptsBuilder, Params, SslOpts, Statement, Value, consts::ColumnType, prelude::Queryable};

use crate::{ColumnInfo, MySQLOptions};

use super::{
    CellValue, CursorColumn, DatabaseDriver, DatabaseSession, DriverError, ExecResp, RowCursor, StatementId,
    escape_backtick, split_table, validate_sql,
};

/// MySQL 二进制字符集编号，区分 BLOB 与 TEXT
const BINARY_CHARSET: u16 = 63;

#[derive(Debug, Clone, Copy)]
pub struct MySQLDriver;

impl DatabaseDriver for MySQLDriver {
    type Config = MySQLOptions;

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let conn = open_conn(config)?;
        Ok(Box::new(MySQLSession::new(conn)))
    }
}

struct MySQLSession {
    conn: Conn,
    statements: HashMap<StatementId, Statement>,
    next_stmt: u32,
}

impl MySQLSession {
    fn new(conn: Conn) -> Self {
        Self {
            conn,
            statements: HashMap::new(),
            next_stmt: 0,
        }
    }
}

impl DatabaseSession for MySQLSession {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        tracing::debug!(sql = %sql);
        self.conn
            .query_drop(sql)
            .map_err(|err| DriverError::Command(err.to_string()))?;
        Ok(ExecResp {
            affected: self.conn.affected_rows(),
        })
    }

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<RowCursor, DriverError> {
        validate_sql(sql)?;
        tracing::debug!(sql = %sql);

        let mut result = self
            .conn
            .query_iter(sql)
            .map_err(|err| DriverError::Query(format!("执行查询失败: {}", err)))?;

        let columns: Vec<CursorColumn> = result
            .columns()
            .as_ref()
            .iter()
            .map(|col| CursorColumn {
                name: col.name_str().to_string(),
                kind: column_kind(col.column_type(), col.character_set()).to_string(),
            })
            .collect();

        let mut records = vec![];
        for row in result.by_ref() {
            let row = row.map_err(|err| DriverError::Query(format!("读取结果失败: {}", err)))?;
            let values = row.unwrap();
            let record = values
                .into_iter()
                .zip(columns.iter())
                .map(|(value, col)| parse_value(value, &col.kind))
                .collect();
            records.push(record);
        }

        Ok(RowCursor::new(columns, records))
    }

    fn columns(
        &mut self,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, DriverError> {
        let sql = match split_table(table) {
            (Some(schema), name) => format!(
                "SHOW FULL COLUMNS FROM `{}` FROM `{}`",
                escape_backtick(name),
                escape_backtick(schema)
            ),
            (None, name) => format!("SHOW FULL COLUMNS FROM `{}`", escape_backtick(name)),
        };
        let rows: Vec<mysql::Row> = self
            .conn
            .query(&sql)
            .map_err(|err| DriverError::Query(format!("查询列信息失败: {}", err)))?;

        let mut columns = vec![];
        for row in rows {
            let name: String = row
                .get("Field")
                .ok_or_else(|| DriverError::Query("缺少 Field 字段".into()))?;

            let mut col = ColumnInfo {
                name,
                kind: String::new(),
                comment: String::new(),
                nullable: false,
                primary_key: false,
                default_value: String::new(),
                max_length: 0,
                auto_increment: false,
            };

            // 批量获取并设置字段值
            for field in ["Type", "Null", "Key", "Extra", "Default", "Comment"] {
                let value = row.get::<Value, _>(field).unwrap_or(Value::NULL);
                let parsed = parse_value(value, "varchar").as_string().unwrap_or_default();
                match field {
                    "Key" => col.primary_key = parsed == "PRI",
                    "Null" => col.nullable = parsed.to_uppercase() == "YES",
                    "Extra" => col.auto_increment = parsed.contains("auto_increment"),
                    "Type" => col.kind = parsed,
                    "Comment" => col.comment = parsed,
                    "Default" => col.default_value = parsed,
                    _ => {}
                }
            }

            columns.push(col);
        }
        Ok(columns)
    }

    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<StatementId, DriverError> {
        validate_sql(sql)?;
        tracing::debug!(sql = %sql, "预编译语句");
        let stmt = self
            .conn
            .prep(sql)
            .map_err(|err| DriverError::Prepare(err.to_string()))?;

        let id = StatementId::new(self.next_stmt);
        self.next_stmt += 1;
        self.statements.insert(id, stmt);
        Ok(id)
    }

    fn execute(
        &mut self,
        stmt: StatementId,
        params: &[Option<String>],
    ) -> Result<ExecResp, DriverError> {
        let prepared = self
            .statements
            .get(&stmt)
            .cloned()
            .ok_or(DriverError::UnknownStatement(stmt))?;
        let values: Vec<Value> = params
            .iter()
            .map(|param| match param {
                Some(text) => Value::from(text.as_str()),
                None => Value::NULL,
            })
            .collect();
        self.conn
            .exec_drop(&prepared, Params::Positional(values))
            .map_err(|err| DriverError::Command(err.to_string()))?;
        Ok(ExecResp {
            affected: self.conn.affected_rows(),
        })
    }

    fn deallocate(
        &mut self,
        stmt: StatementId,
    ) -> Result<(), DriverError> {
        let prepared = self
            .statements
            .remove(&stmt)
            .ok_or(DriverError::UnknownStatement(stmt))?;
        self.conn
            .close(prepared)
            .map_err(|err| DriverError::Command(format!("释放预编译语句失败: {}", err)))
    }
}

fn open_conn(config: &MySQLOptions) -> Result<Conn, DriverError> {
    if config.host.trim().is_empty() {
        return Err(DriverError::MissingField("host".into()));
    }
    if config.username.trim().is_empty() {
        return Err(DriverError::MissingField("username".into()));
    }
    if config.database.trim().is_empty() {
        return Err(DriverError::MissingField("database".into()));
    }
    let port = config
        .port
        .trim()
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidField(format!("port: {}", config.port)))?;

    let mut builder = OptsBuilder::new();
    builder = builder.ip_or_hostname(Some(config.host.clone()));
    builder = builder.tcp_port(port);
    builder = builder.user(Some(config.username.clone()));
    builder = builder.pass(Some(config.password.clone()));
    builder = builder.db_name(Some(config.database.clone()));

    if config.use_tls {
        builder = builder.ssl_opts(Some(SslOpts::default()));
    }
    let opts = Opts::from(builder);
    Conn::new(opts).map_err(|err| DriverError::Other(format!("连接失败: {}", err)))
}

/// 将协议层的列类型归并为通用类型名
fn column_kind(
    column_type: ColumnType,
    charset: u16,
) -> &'static str {
    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR
        | ColumnType::MYSQL_TYPE_BIT => "int",
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => "double",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "decimal",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "date",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "time",
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "datetime",
        ColumnType::MYSQL_TYPE_GEOMETRY => "geometry",
        ColumnType::MYSQL_TYPE_JSON => "json",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => {
            if charset == BINARY_CHARSET {
                "blob"
            } else {
                "text"
            }
        }
        ColumnType::MYSQL_TYPE_STRING | ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_VARCHAR => {
            if charset == BINARY_CHARSET {
                "binary"
            } else {
                "varchar"
            }
        }
        _ => "varchar",
    }
}

/// 文本协议下所有值都以字节返回，按列类型还原
fn parse_value(
    value: Value,
    kind: &str,
) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(bytes) => match kind {
            "int" => {
                let text = String::from_utf8_lossy(&bytes);
                text.parse()
                    .map(CellValue::Int)
                    .unwrap_or_else(|_| CellValue::Text(text.into_owned()))
            }
            "double" => {
                let text = String::from_utf8_lossy(&bytes);
                text.parse()
                    .map(CellValue::Float)
                    .unwrap_or_else(|_| CellValue::Text(text.into_owned()))
            }
            "blob" | "binary" | "geometry" => CellValue::Bytes(bytes),
            _ => CellValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        },
        Value::Int(int) => CellValue::Int(int),
        Value::UInt(uint) => match i64::try_from(uint) {
            Ok(int) => CellValue::Int(int),
            Err(_) => CellValue::Text(uint.to_string()),
        },
        Value::Float(float) => CellValue::Float(float as f64),
        Value::Double(double) => CellValue::Float(double),
        Value::Date(year, month, day, hour, minute, second, micros) => CellValue::Text(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        )),
        Value::Time(neg, days, hours, minutes, seconds, micros) => {
            let sign = if neg { "-" } else { "" };
            CellValue::Text(format!("{sign}{days} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}"))
        }
    }
}
