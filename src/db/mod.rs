//! Query-execution backend
//!
//! The RPC layer talks to the database through the narrow
//! [`QueryExecutor`] trait: list base tables, describe one table's columns,
//! run one read-only statement. [`sqlite::SqliteExecutor`] is the bundled
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QuerywireError, Result};

pub mod sqlite;

pub use sqlite::SqliteExecutor;

/// Message carried by every rejected non read-only statement.
pub const READ_ONLY_VIOLATION: &str = "Only read-only SELECT statements are permitted";

/// Metadata for one table column, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Declared length for types like `VARCHAR(50)`.
    pub max_length: Option<u32>,
}

/// Rows returned by a read-only statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub row_count: usize,
    /// One JSON object per row, keyed by column name.
    pub rows: Vec<Map<String, Value>>,
}

/// Narrow interface to the database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Names of all user base tables, sorted.
    async fn list_base_tables(&self) -> Result<Vec<String>>;

    /// Columns of `table` in declaration order. Empty if the table does not
    /// exist.
    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Run `statement` with named `params`.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Query`] if the statement is not read-only
    /// or fails to execute.
    async fn execute_read_only(
        &self,
        statement: &str,
        params: &Map<String, Value>,
    ) -> Result<QueryResult>;
}

/// Whether `statement` starts with the `SELECT` keyword, ignoring case and
/// leading whitespace or parentheses.
pub fn is_read_only(statement: &str) -> bool {
    let head = statement.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    head.get(..6)
        .is_some_and(|kw| kw.eq_ignore_ascii_case("select"))
        && !head[6..].starts_with(|c: char| c.is_alphanumeric() || c == '_')
}

/// Fail with [`READ_ONLY_VIOLATION`] unless [`is_read_only`] holds.
pub fn ensure_read_only(statement: &str) -> Result<()> {
    if is_read_only(statement) {
        Ok(())
    } else {
        Err(QuerywireError::Query(READ_ONLY_VIOLATION.to_string()).into())
    }
}
