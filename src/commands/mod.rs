/*!
Command handlers for the CLI

- `serve`  -- Run the JSON-RPC server over TCP or stdio
- `client` -- One-shot client commands against a running (or spawned) server
*/

pub mod client;
pub mod serve;

use serde_json::{Map, Value};

use crate::error::{QuerywireError, Result};

/// Parse a `--args` value, which must be a JSON object.
pub(crate) fn parse_object_arg(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(QuerywireError::Parse("--args must be a JSON object".to_string()).into()),
        Err(e) => Err(QuerywireError::Parse(format!("--args is not valid JSON: {}", e)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_arg_accepts_object() {
        let map = parse_object_arg(r#"{"table_name":"ventas"}"#).unwrap();
        assert_eq!(map["table_name"], "ventas");
    }

    #[test]
    fn test_parse_object_arg_rejects_non_object() {
        let err = parse_object_arg("[1,2]").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
        assert!(parse_object_arg("{not json").is_err());
    }
}
