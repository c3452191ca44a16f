//! `execute_query`: run one read-only statement
//!
//! The statement is checked before the backend is called; anything that
//! does not begin with `SELECT` fails with
//! [`crate::db::READ_ONLY_VIOLATION`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::db::{ensure_read_only, QueryExecutor};
use crate::error::Result;
use crate::mcp::types::ToolDescriptor;
use crate::tools::{parse_args, ToolHandler};

const NAME: &str = "execute_query";

#[derive(Debug, Deserialize)]
struct ExecuteQueryArgs {
    query: String,
    #[serde(default)]
    params: Map<String, Value>,
}

pub struct ExecuteQueryTool {
    executor: Arc<dyn QueryExecutor>,
}

impl ExecuteQueryTool {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolHandler for ExecuteQueryTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: NAME.into(),
            description: "Execute a read-only SELECT statement and return its rows".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "SELECT statement to execute"
                    },
                    "params": {
                        "type": "object",
                        "description": "Named parameters, e.g. {\"min\": 10} for :min"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let args: ExecuteQueryArgs = parse_args(NAME, args)?;
        ensure_read_only(&args.query)?;

        let result = self
            .executor
            .execute_read_only(&args.query, &args.params)
            .await?;
        tracing::debug!(rows = result.row_count, "query executed");
        Ok(serde_json::to_value(result)?)
    }
}
