//! `get_tables`: list base-table names

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::db::QueryExecutor;
use crate::error::Result;
use crate::mcp::types::ToolDescriptor;
use crate::tools::ToolHandler;

pub struct GetTablesTool {
    executor: Arc<dyn QueryExecutor>,
}

impl GetTablesTool {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolHandler for GetTablesTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "get_tables".into(),
            description: "List the names of all base tables in the database".into(),
            input_schema: json!({
                "type": "object",
                "properties": {},
            }),
        }
    }

    async fn execute(&self, _args: Value) -> Result<Value> {
        let tables = self.executor.list_base_tables().await?;
        tracing::debug!(count = tables.len(), "listed tables");
        Ok(json!({ "tables": tables }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockQueryExecutor;

    #[tokio::test]
    async fn test_returns_table_names() {
        let mut mock = MockQueryExecutor::new();
        mock.expect_list_base_tables()
            .times(1)
            .returning(|| Ok(vec!["clientes".into(), "ventas".into()]));

        let tool = GetTablesTool::new(Arc::new(mock));
        let out = tool.execute(json!({})).await.unwrap();
        assert_eq!(out, json!({"tables": ["clientes", "ventas"]}));
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let mut mock = MockQueryExecutor::new();
        mock.expect_list_base_tables()
            .returning(|| Err(crate::error::QuerywireError::Query("db down".into()).into()));

        let tool = GetTablesTool::new(Arc::new(mock));
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("db down"));
    }
}
