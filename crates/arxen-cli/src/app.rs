//! Interactive chat application
//!
//! Wraps a running [`NodeHandle`] with the slash-command prompt. Input parsing is a pure
//! function so it can be tested without a terminal; [`ArxenApp::execute`] turns a parsed
//! command into output lines and [`ArxenApp::run_interactive`] drives stdin, node events
//! and Ctrl+C until the user quits.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use arxen_core::{ChatId, FriendList, NodeAddress, TextMessage};
use arxen_runtime::{ChatInfo, NodeEvent, NodeHandle};

use crate::error::{CliError, Result};

/// Messages shown by `/history` without an explicit count
pub const DEFAULT_HISTORY: usize = 20;

const HELP: &[&str] = &[
    "/new <friend|address>... [#name]  create a chat and switch to it",
    "/chats                            list chats",
    "/use <number|name|id>             switch the current chat",
    "/who                              participants of the current chat",
    "/peers                            connection status of known peers",
    "/history [count]                  recent messages of the current chat",
    "/help                             show this help",
    "/quit                             leave",
    "anything else is posted to the current chat",
];

// ----------------------------------------------------------------------------
// Input Parsing
// ----------------------------------------------------------------------------

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    New {
        peers: Vec<String>,
        name: Option<String>,
    },
    Chats,
    Use(String),
    Who,
    Peers,
    History(usize),
    Help,
    Quit,
    Say(String),
    Empty,
    Invalid(String),
}

/// Parse a prompt line
pub fn parse_input(line: &str) -> InputCommand {
    let line = line.trim();
    if line.is_empty() {
        return InputCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return InputCommand::Say(line.to_string());
    };

    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match command {
        "new" => {
            let (names, peers): (Vec<&str>, Vec<&str>) =
                args.into_iter().partition(|arg| arg.starts_with('#'));
            if peers.is_empty() {
                return InputCommand::Invalid("usage: /new <friend|address>... [#name]".into());
            }
            let name = names
                .first()
                .map(|name| name.trim_start_matches('#').to_string())
                .filter(|name| !name.is_empty());
            InputCommand::New {
                peers: peers.into_iter().map(str::to_string).collect(),
                name,
            }
        }
        "chats" => InputCommand::Chats,
        "use" => match args.as_slice() {
            [target] => InputCommand::Use(target.to_string()),
            _ => InputCommand::Invalid("usage: /use <number|name|id>".into()),
        },
        "who" => InputCommand::Who,
        "peers" => InputCommand::Peers,
        "history" => match args.as_slice() {
            [] => InputCommand::History(DEFAULT_HISTORY),
            [count] => match count.parse() {
                Ok(count) => InputCommand::History(count),
                Err(_) => InputCommand::Invalid(format!("not a count: {}", count)),
            },
            _ => InputCommand::Invalid("usage: /history [count]".into()),
        },
        "help" | "?" => InputCommand::Help,
        "quit" | "exit" | "q" => InputCommand::Quit,
        other => InputCommand::Invalid(format!("unknown command /{} (try /help)", other)),
    }
}

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

/// Output of one executed command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub quit: bool,
}

impl Reply {
    fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            quit: false,
        }
    }

    fn lines(lines: Vec<String>) -> Self {
        Self { lines, quit: false }
    }
}

/// Prompt state on top of a running node
pub struct ArxenApp {
    node: NodeHandle,
    friends: FriendList,
    current: Option<ChatId>,
}

impl ArxenApp {
    pub fn new(node: NodeHandle, friends: FriendList) -> Self {
        Self {
            node,
            friends,
            current: None,
        }
    }

    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    pub fn current_chat(&self) -> Option<&ChatId> {
        self.current.as_ref()
    }

    /// Create a chat with friends or addresses and make it current
    pub async fn create_chat(&mut self, peers: &[String], name: Option<&str>) -> Result<ChatInfo> {
        let addresses = peers
            .iter()
            .map(|peer| self.friends.resolve(peer))
            .collect::<std::result::Result<Vec<NodeAddress>, _>>()?;

        let info = match name {
            Some(name) => self.node.create_named_chat(&addresses, name).await?,
            None => self.node.create_chat(&addresses).await?,
        };
        info!(
            "Created chat {} with {} participants",
            info.id,
            info.participants.len()
        );
        self.current = Some(info.id.clone());
        Ok(info)
    }

    /// Execute one parsed command
    pub async fn execute(&mut self, command: InputCommand) -> Result<Reply> {
        match command {
            InputCommand::Empty => Ok(Reply::default()),
            InputCommand::Invalid(reason) => Ok(Reply::line(reason)),
            InputCommand::Help => {
                let lines = HELP.iter().map(|l| l.to_string()).collect();
                Ok(Reply::lines(lines))
            },
            InputCommand::Quit => Ok(Reply {
                lines: Vec::new(),
                quit: true,
            }),
            InputCommand::New { peers, name } => {
                let info = self.create_chat(&peers, name.as_deref()).await?;
                Ok(Reply::line(format!(
                    "created {} with {}",
                    info.name,
                    self.labels(&info.participants)
                )))
            }
            InputCommand::Chats => self.list_chats().await,
            InputCommand::Use(target) => {
                let info = self.find_chat(&target).await?;
                self.current = Some(info.id.clone());
                Ok(Reply::line(format!("now in {}", info.name)))
            }
            InputCommand::Who => {
                let chat_id = self.require_current()?;
                let participants = self.node.participants(&chat_id).await?;
                Ok(Reply::line(self.labels(&participants)))
            }
            InputCommand::Peers => Ok(self.list_peers()),
            InputCommand::History(count) => {
                let chat_id = self.require_current()?;
                let messages = self.node.messages(&chat_id).await?;
                let skip = messages.len().saturating_sub(count);
                let lines = messages[skip..]
                    .iter()
                    .map(|m| self.format_message(m))
                    .collect();
                Ok(Reply::lines(lines))
            }
            InputCommand::Say(text) => {
                let chat_id = self.require_current()?;
                self.node.post_message(&chat_id, text).await?;
                Ok(Reply::default())
            }
        }
    }

    /// Render a node event for the prompt, if it is worth showing
    pub async fn render_event(&mut self, event: &NodeEvent) -> Option<String> {
        match event {
            NodeEvent::ChatJoined(info) => {
                let mut line = format!(
                    "joined {} with {}",
                    info.name,
                    self.labels(&info.participants)
                );
                if self.current.is_none() {
                    self.current = Some(info.id.clone());
                    line.push_str(" (now current)");
                }
                Some(line)
            }
            NodeEvent::MessageAppended(message) if &message.author != self.node.address() => {
                let line = self.format_message(message);
                if self.current.as_ref() == Some(&message.chat_id) {
                    return Some(line);
                }
                let name = match self.node.chat(&message.chat_id).await {
                    Ok(info) => info.name,
                    Err(_) => message.chat_id.to_string(),
                };
                Some(format!("[{}] {}", name, line))
            }
            NodeEvent::PeerConnected(address) => {
                debug!("Peer {} connected", address);
                None
            }
            NodeEvent::PeerDisconnected(address) => {
                debug!("Peer {} disconnected", address);
                None
            }
            _ => None,
        }
    }

    /// Read commands from stdin until `/quit`, end of input or Ctrl+C, then shut the node down
    pub async fn run_interactive(mut self, prompt: &str) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut events = self.node.subscribe_events();

        println!("arxen node {} (type /help)", self.node.address());
        show_prompt(prompt);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("Stdin closed");
                        break;
                    };
                    match self.execute(parse_input(&line)).await {
                        Ok(reply) => {
                            for line in &reply.lines {
                                println!("{}", line);
                            }
                            if reply.quit {
                                break;
                            }
                        }
                        Err(e) => println!("error: {}", e),
                    }
                    show_prompt(prompt);
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(line) = self.render_event(&event).await {
                            println!("\r{}", line);
                            show_prompt(prompt);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} node events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            }
        }

        self.node.shutdown().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn require_current(&self) -> Result<ChatId> {
        self.current
            .clone()
            .ok_or_else(|| CliError::Input("no current chat (use /new or /use)".into()))
    }

    async fn list_chats(&self) -> Result<Reply> {
        let chats = self.node.chats().await;
        if chats.is_empty() {
            return Ok(Reply::line("no chats yet"));
        }
        let lines = chats
            .iter()
            .enumerate()
            .map(|(i, info)| {
                let current = self.current.as_ref() == Some(&info.id);
                let marker = if current { "*" } else { " " };
                format!(
                    "{}{:>3}. {} ({} members, {} messages)",
                    marker,
                    i + 1,
                    info.name,
                    info.participants.len(),
                    info.message_count
                )
            })
            .collect();
        Ok(Reply::lines(lines))
    }

    /// Resolve `/use` targets: a 1-based position from `/chats`, a name or an id
    async fn find_chat(&self, target: &str) -> Result<ChatInfo> {
        let chats = self.node.chats().await;
        let by_position = target
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| chats.get(i));
        let found = by_position.or_else(|| {
            chats
                .iter()
                .find(|info| info.name == target || info.id.as_str() == target)
        });
        found
            .cloned()
            .ok_or_else(|| CliError::Input(format!("no chat matches '{}'", target)))
    }

    fn list_peers(&self) -> Reply {
        let peers = self.node.peers();
        if peers.is_empty() {
            return Reply::line("no known peers");
        }
        Reply::lines(
            peers
                .iter()
                .map(|peer| {
                    format!(
                        "{} {} ({} queued)",
                        self.friends.label(&peer.address),
                        if peer.connected { "connected" } else { "offline" },
                        peer.queued
                    )
                })
                .collect(),
        )
    }

    fn labels(&self, addresses: &[NodeAddress]) -> String {
        addresses
            .iter()
            .map(|address| {
                if address == self.node.address() {
                    "you".to_string()
                } else {
                    self.friends.label(address)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn format_message(&self, message: &TextMessage) -> String {
        let author = if &message.author == self.node.address() {
            "you".to_string()
        } else {
            self.friends.label(&message.author)
        };
        format!("<{}> {}", author, message.text)
    }
}

fn show_prompt(prompt: &str) {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
}
