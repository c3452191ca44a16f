//! Client command handlers
//!
//! Each command opens a session, performs the `initialize` handshake, runs
//! one operation, prints the result to stdout and disconnects.

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::error::Result;
use crate::mcp::session::{ClientOptions, McpClient};
use crate::mcp::transport::stdio::StdioConnector;
use crate::mcp::transport::tcp::TcpConnector;
use crate::mcp::transport::Connector;

use super::parse_object_arg;

/// Connector selected by the CLI: a spawned stdio server or TCP.
pub fn connector_for(config: &Config, stdio: bool) -> Result<Arc<dyn Connector>> {
    if stdio {
        Ok(Arc::new(StdioConnector::for_current_exe(
            config.database.path.clone(),
        )?))
    } else {
        Ok(Arc::new(TcpConnector::new(
            config.client.host.clone(),
            config.client.port,
        )))
    }
}

async fn open_session(config: &Config, stdio: bool) -> Result<McpClient> {
    let client = McpClient::new(
        connector_for(config, stdio)?,
        ClientOptions::from(&config.client),
    );
    client.connect().await?;
    client.initialize().await?;
    Ok(client)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `tools`
pub async fn list_tools(config: &Config, stdio: bool) -> Result<()> {
    let client = open_session(config, stdio).await?;
    let tools = client.list_tools().await?;
    for tool in &tools {
        println!("{:<16} {}", tool.name, tool.description);
    }
    client.disconnect();
    Ok(())
}

/// `call <tool> --args <json>`
pub async fn call_tool(config: &Config, stdio: bool, tool: &str, args: &str) -> Result<()> {
    let arguments = Value::Object(parse_object_arg(args)?);
    let client = open_session(config, stdio).await?;
    let outcome = client.call_tool(tool, arguments).await;
    client.disconnect();

    let outcome = outcome?;
    print_json(&outcome.result.payload()?)?;
    eprintln!("Completed in {} ms", outcome.elapsed.as_millis());
    Ok(())
}

/// `prompts`
pub async fn list_prompts(config: &Config, stdio: bool) -> Result<()> {
    let client = open_session(config, stdio).await?;
    let prompts = client.list_prompts().await?;
    for prompt in &prompts {
        let args: Vec<String> = prompt
            .arguments
            .iter()
            .map(|a| {
                if a.required {
                    a.name.clone()
                } else {
                    format!("[{}]", a.name)
                }
            })
            .collect();
        println!(
            "{:<16} {:<24} {}",
            prompt.name,
            args.join(" "),
            prompt.description.as_deref().unwrap_or("")
        );
    }
    client.disconnect();
    Ok(())
}

/// `prompt <name> --args <json>`
pub async fn get_prompt(config: &Config, stdio: bool, name: &str, args: &str) -> Result<()> {
    let arguments = parse_object_arg(args)?;
    let client = open_session(config, stdio).await?;
    let rendered = client.get_prompt(name, arguments).await;
    client.disconnect();

    for message in rendered?.messages {
        println!("{}", message.content.as_text());
    }
    Ok(())
}

/// `resources`
pub async fn list_resources(config: &Config, stdio: bool) -> Result<()> {
    let client = open_session(config, stdio).await?;
    let resources = client.list_resources().await?;
    for resource in &resources {
        println!(
            "{:<32} {}",
            resource.uri,
            resource.description.as_deref().unwrap_or("")
        );
    }
    client.disconnect();
    Ok(())
}

/// `read <uri>`
pub async fn read_resource(config: &Config, stdio: bool, uri: &str) -> Result<()> {
    let client = open_session(config, stdio).await?;
    let read = client.read_resource(uri).await;
    client.disconnect();

    for contents in read?.contents {
        match serde_json::from_str::<Value>(&contents.text) {
            Ok(value) => print_json(&value)?,
            Err(_) => println!("{}", contents.text),
        }
    }
    Ok(())
}
