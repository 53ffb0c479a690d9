//! Command handlers for the Arxen CLI

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use arxen_core::NodeAddress;
use arxen_runtime::{NodeBuilder, NodeHandle};
use arxen_tcp::TcpTransport;

use crate::app::ArxenApp;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command.clone() {
            Commands::Run => Self::handle_run_command(&cli, &config).await,
            Commands::Chat { peers, name } => {
                Self::handle_chat_command(&cli, &config, peers, name).await
            }
            Commands::Friends { json } => Self::handle_friends_command(&config, json),
        }
    }

    /// Start a node and the interactive prompt
    async fn handle_run_command(cli: &Cli, config: &AppConfig) -> Result<()> {
        let app = Self::start_app(cli, config).await?;
        app.run_interactive(&config.node.prompt).await
    }

    /// Start a node, create a chat and enter the prompt with it selected
    async fn handle_chat_command(
        cli: &Cli,
        config: &AppConfig,
        peers: Vec<String>,
        name: Option<String>,
    ) -> Result<()> {
        let mut app = Self::start_app(cli, config).await?;
        let info = app.create_chat(&peers, name.as_deref()).await?;
        println!("created {} ({})", info.name, info.id);
        app.run_interactive(&config.node.prompt).await
    }

    /// Print the configured friends
    fn handle_friends_command(config: &AppConfig, json: bool) -> Result<()> {
        let friends = config.friend_list()?;
        if json {
            #[derive(Serialize)]
            struct FriendEntry<'a> {
                name: &'a str,
                address: &'a NodeAddress,
                friend_id: &'a str,
            }
            let entries: Vec<FriendEntry<'_>> = friends
                .iter()
                .map(|friend| FriendEntry {
                    name: &friend.name,
                    address: &friend.address,
                    friend_id: &friend.friend_id,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        if friends.is_empty() {
            println!("No friends configured");
            return Ok(());
        }
        println!("Friends:");
        for friend in friends.iter() {
            println!("  {:<16} {}", friend.name, friend.address);
        }
        Ok(())
    }

    async fn start_app(cli: &Cli, config: &AppConfig) -> Result<ArxenApp> {
        let node = Self::start_node(cli, config).await?;
        Ok(ArxenApp::new(node, config.friend_list()?))
    }

    async fn start_node(cli: &Cli, config: &AppConfig) -> Result<NodeHandle> {
        let address = config.resolve_address(cli)?;
        info!("Starting node {}", address);
        let node = NodeBuilder::new(address)
            .with_config(config.node_config())
            .with_transport(Arc::new(TcpTransport::new()))
            .start()
            .await?;
        Ok(node)
    }
}
