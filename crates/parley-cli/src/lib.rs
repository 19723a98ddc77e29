use std::path::PathBuf;

use clap::Parser;

mod commands;
mod store;

pub use store::{ENV_SESSION_FILE, FileAuthStateStore, SessionFileError, resolve_session_path};

#[derive(Debug, Parser)]
#[command(name = "parley")]
#[command(about = "Parley chat client")]
pub struct ParleyCli {
    /// Backend base url (default: $PARLEY_API_BASE_URL, then $PARLEY_BACKEND_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Session file (default: $PARLEY_SESSION_FILE, then <config dir>/parley/session.json)
    #[arg(long, global = true)]
    pub session_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Send a message and stream the reply as JSON lines (Ctrl-C cancels)
    Send {
        conversation_id: String,
        message: String,
    },
    /// List conversations, refreshing an expired session once
    Conversations,
    /// Refresh the stored session now
    Refresh,
    /// Show when the stored access token expires
    Token,
    /// Keep the session fresh until Ctrl-C
    Watch {
        /// Seconds between re-arming the refresh timer
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
    /// Sign out and forget the stored session
    Logout,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = ParleyCli::parse();
    commands::run(cli).await
}
