//! `describe_table`: ordered column metadata for one table
//!
//! A table with no columns is reported in-band as not found rather than as
//! an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::QueryExecutor;
use crate::error::Result;
use crate::mcp::types::ToolDescriptor;
use crate::tools::{parse_args, ToolHandler};

const NAME: &str = "describe_table";

#[derive(Debug, Deserialize)]
struct DescribeTableArgs {
    table_name: String,
}

pub struct DescribeTableTool {
    executor: Arc<dyn QueryExecutor>,
}

impl DescribeTableTool {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolHandler for DescribeTableTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: NAME.into(),
            description: "Describe the columns of a table in declaration order".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": {
                        "type": "string",
                        "description": "Name of the table to describe"
                    }
                },
                "required": ["table_name"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let args: DescribeTableArgs = parse_args(NAME, args)?;
        let columns = self.executor.describe_columns(&args.table_name).await?;

        if columns.is_empty() {
            return Ok(json!({
                "table": args.table_name,
                "found": false,
                "message": format!("Table '{}' not found", args.table_name),
            }));
        }

        Ok(json!({
            "table": args.table_name,
            "found": true,
            "columns": columns,
        }))
    }
}
