//! Tool handlers and registry
//!
//! Each tool implements [`ToolHandler`]: a static [`ToolDescriptor`] for
//! `tools/list` and an async `execute` for `tools/call`. The
//! [`ToolRegistry`] maps names to handlers and preserves registration order
//! so discovery output is stable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::db::QueryExecutor;
use crate::error::{QuerywireError, Result};
use crate::mcp::types::ToolDescriptor;

pub mod describe_table;
pub mod execute_query;
pub mod get_tables;

pub use describe_table::DescribeTableTool;
pub use execute_query::ExecuteQueryTool;
pub use get_tables::GetTablesTool;

/// Server-side implementation of one tool.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use querywire::error::Result;
/// use querywire::mcp::types::ToolDescriptor;
/// use querywire::tools::ToolHandler;
///
/// struct Echo;
///
/// #[async_trait]
/// impl ToolHandler for Echo {
///     fn descriptor(&self) -> ToolDescriptor {
///         ToolDescriptor {
///             name: "echo".into(),
///             description: "Returns its arguments".into(),
///             input_schema: json!({"type": "object"}),
///         }
///     }
///
///     async fn execute(&self, args: Value) -> Result<Value> {
///         Ok(args)
///     }
/// }
/// ```
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Descriptor published through `tools/list`.
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool with its `arguments` object.
    ///
    /// # Errors
    ///
    /// [`QuerywireError::Protocol`] for malformed arguments; any other error
    /// is reported to the caller as a handler failure.
    async fn execute(&self, args: Value) -> Result<Value>;
}

/// Decode a tool's `arguments` object into `T`.
///
/// # Errors
///
/// Returns [`QuerywireError::Protocol`] naming the tool when the arguments
/// do not match.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| {
        QuerywireError::Protocol(format!("Invalid arguments for {tool}: {e}")).into()
    })
}

/// Name-to-handler map in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `get_tables`, `describe_table` and `execute_query`
    /// backed by `executor`.
    pub fn with_query_tools(executor: Arc<dyn QueryExecutor>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GetTablesTool::new(Arc::clone(&executor))));
        registry.register(Arc::new(DescribeTableTool::new(Arc::clone(&executor))));
        registry.register(Arc::new(ExecuteQueryTool::new(executor)));
        registry
    }

    /// Register `handler` under its descriptor name, replacing any previous
    /// handler with that name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.descriptor().name;
        if self.tools.insert(name.clone(), handler).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|handler| handler.descriptor())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}
