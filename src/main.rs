//! querywire - JSON-RPC database tool server and client
//!
#![doc = "Main entry point for the querywire binary."]

use anyhow::Result;

use querywire::cli::{Cli, Commands};
use querywire::commands;
use querywire::config::Config;
use querywire::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_logging(cli.log_format, cli.verbose)?;

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/querywire.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match &cli.command {
        Commands::Serve => {
            tracing::info!("Starting server");
            commands::serve::run_serve(config, cli.stdio).await
        }
        Commands::Tools => commands::client::list_tools(&config, cli.stdio).await,
        Commands::Call { tool, args } => {
            tracing::debug!("Calling tool: {}", tool);
            commands::client::call_tool(&config, cli.stdio, tool, args).await
        }
        Commands::Prompts => commands::client::list_prompts(&config, cli.stdio).await,
        Commands::Prompt { name, args } => {
            commands::client::get_prompt(&config, cli.stdio, name, args).await
        }
        Commands::Resources => commands::client::list_resources(&config, cli.stdio).await,
        Commands::Read { uri } => commands::client::read_resource(&config, cli.stdio, uri).await,
    }
}
