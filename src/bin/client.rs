//! Interactive relay client
//!
//! Joins a relay server, prints everything other peers broadcast, and
//! reads commands from standard input:
//!
//!   /send <path>   broadcast a file
//!   /users         ask who is online
//!   /quit          leave
//!
//! Any other line is broadcast as a chat message. Received files land in
//! the downloads directory, named after their final path component.

use chatrelay::protocol::DEFAULT_PORT;
use chatrelay::{ClientCommand, ClientConfig, PeerSession, SessionEvent};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chatrelay-client", about = "Interactive relay chat client")]
struct ClientArgs {
    /// Server host to join
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display name; prompted for interactively when omitted
    #[arg(long)]
    name: Option<String>,

    /// Directory received files are saved into
    #[arg(long, default_value = "received_files")]
    downloads: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = ClientArgs::parse();
    let username = match args.name {
        Some(name) => name,
        None => prompt_username()?,
    };

    let config = ClientConfig {
        host: args.host,
        port: args.port,
        username,
        download_dir: args.downloads,
        ..Default::default()
    };
    let session = PeerSession::connect(config).await?;
    println!("Joined relay at {}", session.server_addr());
    println!("Commands: /send <path>, /users, /quit; anything else is chat");

    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let input_task = tokio::spawn(read_commands(command_tx));
    let session_task = tokio::spawn(session.run(command_rx, event_tx));

    while let Some(event) = event_rx.recv().await {
        match event {
            SessionEvent::Message { sender, text } => {
                println!("{}: {}", sender, text);
            },
            SessionEvent::OnlineUsers(users) => {
                println!("online: {}", users.join(", "));
            },
            SessionEvent::FileReceived {
                filename,
                path,
                len,
            } => {
                println!("received {} ({} bytes), saved to {}", filename, len, path.display());
            },
            SessionEvent::Disconnected { reason } => {
                println!("disconnected: {}", reason);
                break;
            },
        }
    }

    input_task.abort();
    session_task.await??;
    Ok(())
}

/// Turn stdin lines into session commands
async fn read_commands(commands: mpsc::Sender<ClientCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            // End of input means quit
            Ok(None) | Err(_) => {
                let _ = commands.send(ClientCommand::Quit).await;
                return;
            },
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            let _ = commands.send(ClientCommand::Quit).await;
            return;
        }
        let command = if line == "/users" {
            ClientCommand::RequestOnlineUsers
        } else if let Some(path) = line.strip_prefix("/send ") {
            ClientCommand::SendFile(PathBuf::from(path.trim()))
        } else {
            ClientCommand::SendText(line.to_string())
        };
        if commands.send(command).await.is_err() {
            return;
        }
    }
}

/// Ask for a display name until a non-empty one arrives
///
/// Runs before the session starts, so plain blocking stdin is fine here.
fn prompt_username() -> Result<String, Box<dyn std::error::Error>> {
    loop {
        print!("Enter your name: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            return Err("no name given".into());
        }
        let name = line.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }
}
