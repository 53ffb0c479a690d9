//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Address this node listens on and announces to peers (host:port)
    #[arg(short, long, env = "USER_ADDR")]
    pub address: Option<String>,

    /// Listen on the outbound interface's IP instead of a configured address
    #[arg(long, conflicts_with = "address")]
    pub detect_ip: bool,

    /// Port used together with --detect-ip
    #[arg(long, default_value_t = 7878)]
    pub port: u16,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start a node and the interactive prompt
    Run,
    /// Start a node, create a chat with the given peers and enter it
    Chat {
        /// Friend names or node addresses
        #[arg(required = true)]
        peers: Vec<String>,
        /// Display name of the new chat
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List configured friends
    Friends {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_command() {
        let cli = Cli::try_parse_from([
            "arxen",
            "--address",
            "127.0.0.1:9000",
            "chat",
            "alice",
            "10.0.0.2:7878",
            "--name",
            "team",
        ])
        .unwrap();

        assert_eq!(cli.address.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(
            cli.command,
            Commands::Chat {
                peers: vec!["alice".into(), "10.0.0.2:7878".into()],
                name: Some("team".into()),
            }
        );
    }

    #[test]
    fn test_detect_ip_conflicts_with_address() {
        let result = Cli::try_parse_from(["arxen", "--detect-ip", "--address", "a:1", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_requires_peers() {
        assert!(Cli::try_parse_from(["arxen", "chat"]).is_err());
    }
}
