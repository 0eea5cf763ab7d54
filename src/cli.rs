use std::time::Duration;

use once_cell::sync::Lazy;
use structopt::StructOpt;

pub static COMMAND: Lazy<CommandLineArgs> = Lazy::new(CommandLineArgs::from_args);

#[derive(Debug, StructOpt)]
#[structopt(name = "tchannel-demo", about = "Demo binary for the channel transport")]
pub struct CommandLineArgs {
    /// Host/interface to listen on.
    #[structopt(long = "host", default_value = "127.0.0.1")]
    pub host: String,
    /// Port to listen on; 0 picks an ephemeral port.
    #[structopt(short = "p", long = "port", default_value = "7001")]
    pub port: u16,
    /// host:port of a peer to dial and send a demo call to on startup.
    #[structopt(long = "peer")]
    pub peer: Option<String>,
    /// Per-request timeout, in milliseconds, for the demo call.
    #[structopt(long = "timeout-ms", default_value = "2000")]
    pub timeout_ms: u64,
    /// Enable debug-level logging.
    #[structopt(short = "d", long = "debug")]
    pub debug: bool,
}

impl CommandLineArgs {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}
