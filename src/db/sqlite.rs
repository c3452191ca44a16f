//! SQLite implementation of [`QueryExecutor`]
//!
//! One `rusqlite::Connection` behind a mutex; every call runs on the
//! blocking pool so the async executor never waits on disk I/O. The mutex
//! serializes physical execution, and the dispatcher's semaphore bounds how
//! many calls queue for it.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Number, Value};

use crate::db::{ensure_read_only, ColumnInfo, QueryExecutor, QueryResult, READ_ONLY_VIOLATION};
use crate::error::{QuerywireError, Result};

const LIST_TABLES_SQL: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const DESCRIBE_SQL: &str =
    "SELECT name, type, \"notnull\" FROM pragma_table_info(?1) ORDER BY cid";

/// Prefixes SQLite accepts for named parameters.
const PARAM_PREFIXES: [char; 3] = [':', '@', '$'];

fn length_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\((\d+)\)").ok())
        .as_ref()
}

/// Declared length of a type such as `VARCHAR(50)`.
fn declared_length(data_type: &str) -> Option<u32> {
    length_pattern()?
        .captures(data_type)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// SQLite-backed query executor.
///
/// # Examples
///
/// ```
/// use querywire::db::{QueryExecutor, SqliteExecutor};
///
/// # tokio_test::block_on(async {
/// let db = SqliteExecutor::open_in_memory().unwrap();
/// let result = db
///     .execute_read_only("SELECT 1 AS one", &Default::default())
///     .await
///     .unwrap();
/// assert_eq!(result.row_count, 1);
/// assert_eq!(result.rows[0]["one"], 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl SqliteExecutor {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Database`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(QuerywireError::from)?;
        tracing::info!(path = %path.display(), "opened database");
        Ok(Self::from_connection(conn, path.display().to_string()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(QuerywireError::from)?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    fn from_connection(conn: Connection, label: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            label,
        }
    }

    /// Path or `:memory:`.
    pub fn label(&self) -> &str {
        &self.label
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| QuerywireError::Query(format!("query task failed: {e}")))?
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect()),
    }
}

fn bind_named(stmt: &mut rusqlite::Statement<'_>, params: &Map<String, Value>) -> Result<()> {
    for (name, value) in params {
        let index = if name.starts_with(PARAM_PREFIXES) {
            stmt.parameter_index(name)?
        } else {
            let mut found = None;
            for prefix in PARAM_PREFIXES {
                found = stmt.parameter_index(&format!("{prefix}{name}"))?;
                if found.is_some() {
                    break;
                }
            }
            found
        };

        let index = index.ok_or_else(|| {
            QuerywireError::Query(format!("statement has no parameter named '{name}'"))
        })?;
        stmt.raw_bind_parameter(index, to_sql(value))?;
    }
    Ok(())
}

fn run_query(conn: &Connection, statement: &str, params: &Map<String, Value>) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(statement)
        .map_err(|e| QuerywireError::Query(e.to_string()))?;
    if !stmt.readonly() {
        return Err(QuerywireError::Query(READ_ONLY_VIOLATION.to_string()).into());
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    bind_named(&mut stmt, params)?;

    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| QuerywireError::Query(e.to_string()))? {
        let mut record = Map::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), to_json(row.get_ref(i)?));
        }
        out.push(record);
    }

    Ok(QueryResult {
        row_count: out.len(),
        rows: out,
    })
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn list_base_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(LIST_TABLES_SQL)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
    }

    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(DESCRIBE_SQL)?;
            let columns = stmt
                .query_map([&table], |row| {
                    let data_type: String = row.get(1)?;
                    let not_null: i64 = row.get(2)?;
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        max_length: declared_length(&data_type),
                        data_type,
                        nullable: not_null == 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(columns)
        })
        .await
    }

    async fn execute_read_only(
        &self,
        statement: &str,
        params: &Map<String, Value>,
    ) -> Result<QueryResult> {
        ensure_read_only(statement)?;
        let statement = statement.to_string();
        let params = params.clone();
        self.with_conn(move |conn| run_query(conn, &statement, &params))
            .await
    }
}
