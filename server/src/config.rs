use clap::Parser;
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(name = "mukatte-server")]
#[command(about = "Room coordinator and peer relay for the mukatte card game")]
pub struct ServerConfig {
    /// Host to bind
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port in which the game server will listen
    #[arg(short, long, default_value_t = 3669)]
    pub port: u16,

    /// Directory holding the card images a board is dealt from
    #[arg(long, default_value = "./mento-mukatte-ui/img")]
    pub assets: PathBuf,

    /// Close a live connection after this many seconds without a frame
    #[arg(long, default_value_t = 600)]
    pub idle_timeout_secs: u64,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }
}
